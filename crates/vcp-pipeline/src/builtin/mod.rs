//! Built-in preprocessor modules.
//!
//! Preprocessors run in-process, so in a compiled runtime they are bundled
//! here and selected by the manifest's `entryPoint.script` value. Adding a
//! module means implementing
//! [`MessagePreprocessor`](crate::MessagePreprocessor) and wiring its
//! selector into [`resolve`].
//!
//! | Selector | Module | Description |
//! |---|---|---|
//! | `image-recognizer` | [`image_recognizer`] | Replaces image parts with text annotations |
//! | `context-trimmer` | [`context_trimmer`] | Caps the message array length |

use std::sync::Arc;

use crate::MessagePreprocessor;

pub mod context_trimmer;
pub mod image_recognizer;

/// Resolves a manifest `script` selector to its built-in module.
pub fn resolve(script: &str) -> Option<Arc<dyn MessagePreprocessor>> {
    match script {
        "image-recognizer" => Some(Arc::new(image_recognizer::ImageRecognizer)),
        "context-trimmer" => Some(Arc::new(context_trimmer::ContextTrimmer)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_selectors_resolve() {
        assert!(resolve("image-recognizer").is_some());
        assert!(resolve("context-trimmer").is_some());
        assert!(resolve("no-such-module").is_none());
    }
}
