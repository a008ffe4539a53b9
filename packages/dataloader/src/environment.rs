//! Per-dispatch environment handed to batch loaders and instrumentation

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque, shareable context value
pub type ContextValue = Arc<dyn Any + Send + Sync>;

/// Environment of a single batch dispatch
///
/// Carries the request-scoped context supplied when the registry was built
/// and the per-key contexts passed to [`DataLoader::load_with_context`],
/// aligned with the order in which keys were queued.
///
/// [`DataLoader::load_with_context`]: crate::DataLoader::load_with_context
#[derive(Clone, Default)]
pub struct BatchLoaderEnvironment {
    context: Option<ContextValue>,
    key_contexts: Vec<Option<ContextValue>>,
}

impl BatchLoaderEnvironment {
    pub fn new(context: Option<ContextValue>, key_contexts: Vec<Option<ContextValue>>) -> Self {
        Self {
            context,
            key_contexts,
        }
    }

    /// Environment carrying only a request context
    pub fn with_context<T: Any + Send + Sync>(context: T) -> Self {
        Self::new(Some(Arc::new(context)), Vec::new())
    }

    /// Typed access to the request context
    pub fn context<T: Any>(&self) -> Option<&T> {
        self.context.as_deref()?.downcast_ref::<T>()
    }

    /// The request context without a type check
    pub fn raw_context(&self) -> Option<&ContextValue> {
        self.context.as_ref()
    }

    /// Per-key contexts in queue order
    pub fn key_contexts(&self) -> &[Option<ContextValue>] {
        &self.key_contexts
    }

    /// Typed access to the context of the key at `index`
    pub fn key_context<T: Any>(&self, index: usize) -> Option<&T> {
        self.key_contexts
            .get(index)?
            .as_deref()?
            .downcast_ref::<T>()
    }
}

impl fmt::Debug for BatchLoaderEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchLoaderEnvironment")
            .field("has_context", &self.context.is_some())
            .field("key_contexts", &self.key_contexts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct RequestContext {
        tenant: &'static str,
    }

    #[test]
    fn test_typed_context_access() {
        let env = BatchLoaderEnvironment::with_context(RequestContext { tenant: "acme" });
        assert_eq!(
            env.context::<RequestContext>(),
            Some(&RequestContext { tenant: "acme" })
        );
        assert!(env.context::<String>().is_none());
    }

    #[test]
    fn test_key_contexts() {
        let env = BatchLoaderEnvironment::new(
            None,
            vec![Some(Arc::new(7u32) as ContextValue), None],
        );
        assert!(env.context::<RequestContext>().is_none());
        assert_eq!(env.key_context::<u32>(0), Some(&7));
        assert_eq!(env.key_context::<u32>(1), None);
        assert_eq!(env.key_context::<u32>(5), None);
        assert_eq!(env.key_contexts().len(), 2);
    }
}
