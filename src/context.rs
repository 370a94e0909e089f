use std::collections::HashMap;

/// Shallow-copied per upload so signer-relay and completion calls see a
/// stable snapshot, per spec's Context data model.
pub type Context = HashMap<String, String>;

/// Stand-in for the host's ambient context object (`getContext()` in the
/// original). The crate never assumes a particular host; embedders
/// implement this trait over whatever global state they keep (session
/// token, locale, request id, ...).
pub trait AmbientContextProvider: Send + Sync {
    fn get_context(&self) -> Context;
}

/// An `AmbientContextProvider` that always returns the same snapshot.
/// Suitable for embedders with no dynamic ambient state, or for tests.
#[derive(Clone, Default)]
pub struct StaticContextProvider(Context);

impl StaticContextProvider {
    pub fn new(context: Context) -> Self {
        Self(context)
    }

    pub fn empty() -> Self {
        Self(Context::new())
    }
}

impl AmbientContextProvider for StaticContextProvider {
    fn get_context(&self) -> Context {
        self.0.clone()
    }
}

/// Merge the caller-supplied context over the ambient snapshot: explicit
/// values win, matching the way `params.filename`/`params.type` override
/// per-input values in the normalizer (spec §4.3 Phase 1).
pub fn merge_context(ambient: &Context, explicit: Option<&Context>) -> Context {
    let mut merged = ambient.clone();
    if let Some(explicit) = explicit {
        for (k, v) in explicit {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_context_overrides_ambient() {
        let ambient: Context = [("locale".to_string(), "en".to_string())].into();
        let explicit: Context = [("locale".to_string(), "fr".to_string())].into();
        let merged = merge_context(&ambient, Some(&explicit));
        assert_eq!(merged.get("locale").map(String::as_str), Some("fr"));
    }

    #[test]
    fn no_explicit_context_keeps_ambient() {
        let ambient: Context = [("token".to_string(), "abc".to_string())].into();
        let merged = merge_context(&ambient, None);
        assert_eq!(merged.get("token").map(String::as_str), Some("abc"));
    }
}
