use crate::error::Result;
use crate::tree::ConfTree;

/// A read-through fallback sequence of [`ConfTree`]s: writes always go to
/// the top of the stack, and a value equal to what a lower layer already
/// provides is erased from the top rather than stored redundantly
/// (spec.md §3, Testable property 3).
pub struct ConfStack {
    layers: Vec<ConfTree>,
}

impl ConfStack {
    /// `layers[0]` is the top of the stack (highest priority, read and
    /// written first); later entries are progressively lower-priority
    /// fallbacks.
    pub fn new(layers: Vec<ConfTree>) -> Self {
        ConfStack { layers }
    }

    pub fn get(&self, name: &str, section: &str) -> Option<String> {
        for layer in &self.layers {
            if let Some(v) = layer.get(name, section) {
                return Some(v);
            }
        }
        None
    }

    /// Write `value` to the top layer. If a lower layer already returns the
    /// same value for `name`/`section`, erase it from the top layer instead
    /// of storing a redundant override.
    pub fn set(&mut self, name: &str, value: &str, section: &str) -> Result<()> {
        let lower_equal = self.layers[1..]
            .iter()
            .find_map(|l| l.get(name, section))
            .as_deref()
            == Some(value);
        let top = self.layers.first_mut().expect("stack must have a top layer");
        if lower_equal {
            top.erase(name, section)
        } else {
            top.set(name, value, section)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::Flags;

    #[test]
    fn collapse_on_equal_lower_value() {
        let lower = ConfTree::from_string("k = same\n", Flags::NONE);
        let top = ConfTree::empty(Flags::NONE);
        let mut stack = ConfStack::new(vec![top, lower]);
        stack.set("k", "same", "").unwrap();
        assert_eq!(stack.layers[0].inner().get("k", ""), None);
        assert_eq!(stack.get("k", ""), Some("same".to_string()));
    }

    #[test]
    fn override_when_different() {
        let lower = ConfTree::from_string("k = low\n", Flags::NONE);
        let top = ConfTree::empty(Flags::NONE);
        let mut stack = ConfStack::new(vec![top, lower]);
        stack.set("k", "high", "").unwrap();
        assert_eq!(stack.get("k", ""), Some("high".to_string()));
    }
}
