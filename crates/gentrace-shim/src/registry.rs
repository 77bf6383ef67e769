//! Static interception table.
//!
//! Pure data: which (module, object, method) call sites get wrapped, with
//! what call shape and generation kind. Binding against live adapters
//! happens in the bootstrap module.

use serde::{Deserialize, Serialize};

/// Calling convention of an intercepted method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallShape {
    Sync,
    Async,
    SyncStream,
    AsyncStream,
}

impl CallShape {
    pub fn as_str(self) -> &'static str {
        match self {
            CallShape::Sync => "sync",
            CallShape::Async => "async",
            CallShape::SyncStream => "sync-stream",
            CallShape::AsyncStream => "async-stream",
        }
    }
}

/// Response kind produced by an intercepted method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Completion,
    Chat,
}

/// Wrapping strategy for a call shape: plain delegation or production of a
/// lazy sequence, in sync or async flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapStrategy {
    Plain,
    PlainAsync,
    Stream,
    AsyncStream,
}

/// Identity of one interceptable call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    pub module: String,
    pub object: String,
    pub method: String,
}

impl TargetKey {
    pub fn new(
        module: impl Into<String>,
        object: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            object: object.into(),
            method: method.into(),
        }
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.module, self.object, self.method)
    }
}

/// One interception target. Immutable; defined once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub module: String,
    pub object: String,
    pub method: String,
    pub shape: CallShape,
    pub kind: GenerationKind,
}

impl MethodSpec {
    pub fn new(
        module: impl Into<String>,
        object: impl Into<String>,
        method: impl Into<String>,
        shape: CallShape,
        kind: GenerationKind,
    ) -> Self {
        Self {
            module: module.into(),
            object: object.into(),
            method: method.into(),
            shape,
            kind,
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(
            self.module.clone(),
            self.object.clone(),
            self.method.clone(),
        )
    }

    /// Span and record name for calls through this target.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.module, self.object, self.method)
    }
}

/// Table of interception targets.
#[derive(Debug, Clone, Default)]
pub struct MethodRegistry {
    entries: Vec<MethodSpec>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one target. Re-registering the same (module, object, method)
    /// replaces the prior entry — wrappers never stack.
    pub fn register(&mut self, spec: MethodSpec) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.key() == spec.key()) {
            *existing = spec;
        } else {
            self.entries.push(spec);
        }
    }

    /// Map a call shape to its wrapping strategy.
    pub fn resolve(shape: CallShape) -> WrapStrategy {
        match shape {
            CallShape::Sync => WrapStrategy::Plain,
            CallShape::Async => WrapStrategy::PlainAsync,
            CallShape::SyncStream => WrapStrategy::Stream,
            CallShape::AsyncStream => WrapStrategy::AsyncStream,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MethodSpec> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The method table of the router client this shim ships against: the chat
/// session loop plus the sync/async generate calls in unary and streaming
/// forms.
pub fn default_method_specs() -> Vec<MethodSpec> {
    vec![
        MethodSpec::new(
            "router.chat",
            "ChatSession",
            "run",
            CallShape::Sync,
            GenerationKind::Chat,
        ),
        MethodSpec::new(
            "router.client",
            "Client",
            "generate",
            CallShape::Sync,
            GenerationKind::Completion,
        ),
        MethodSpec::new(
            "router.client",
            "Client",
            "generate_stream",
            CallShape::SyncStream,
            GenerationKind::Completion,
        ),
        MethodSpec::new(
            "router.client",
            "AsyncClient",
            "generate",
            CallShape::Async,
            GenerationKind::Completion,
        ),
        MethodSpec::new(
            "router.client",
            "AsyncClient",
            "generate_stream",
            CallShape::AsyncStream,
            GenerationKind::Completion,
        ),
    ]
}
