//! Stacks several stores so that the topmost one with a matching path wins,
//! except for directory listings, which are merged across the whole stack
//! (upper layers shadow lower ones of the same name). Ported from
//! `meta/layer.go`'s `Layered`/`mergedDir`.
use std::collections::HashMap;
use std::sync::Arc;

use super::{Error, MetaStore};
use crate::inode::Node;

/// A stack of stores. `layers[0]` is the topmost (most authoritative)
/// store; later layers are searched only on a miss.
pub struct LayeredStore {
    layers: Vec<Arc<dyn MetaStore>>,
}

impl LayeredStore {
    /// Build a layered store from `layers` ordered bottom-to-top, matching
    /// `Layered(s1, s2)` searching `s2` first: the *last* argument is the
    /// topmost layer. A single-element stack degenerates to a direct
    /// passthrough (see [`MetaStore::get`]/[`MetaStore::children`]), with
    /// no merge-facade overhead, mirroring the original's early return of
    /// its sole argument.
    pub fn new(layers_bottom_to_top: Vec<Arc<dyn MetaStore>>) -> Self {
        let mut layers = layers_bottom_to_top;
        layers.reverse();
        Self { layers }
    }
}

impl MetaStore for LayeredStore {
    fn get(&self, path: &str) -> Result<Arc<Node>, Error> {
        if self.layers.len() == 1 {
            return self.layers[0].get(path);
        }
        for store in &self.layers {
            match store.get(path) {
                Ok(node) => return Ok(node),
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotFound(path.to_string()))
    }

    fn children(&self, path: &str) -> Result<Vec<Arc<Node>>, Error> {
        if self.layers.len() == 1 {
            return self.layers[0].children(path);
        }

        let mut merged = HashMap::new();
        let mut found_any = false;
        for store in &self.layers {
            match store.children(path) {
                Ok(children) => {
                    found_any = true;
                    for child in children {
                        merged.entry(child.name().to_string()).or_insert(child);
                    }
                }
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        if !found_any {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(merged.into_values().collect())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use super::*;
    use crate::inode::{Access, Attr, Directory};

    struct FakeStore {
        entries: Mutex<HashMap<String, Arc<Node>>>,
        listings: Mutex<HashMap<String, Vec<Arc<Node>>>>,
    }

    impl MetaStore for FakeStore {
        fn get(&self, path: &str) -> Result<Arc<Node>, Error> {
            self.entries
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| Error::NotFound(path.to_string()))
        }
        fn children(&self, path: &str) -> Result<Vec<Arc<Node>>, Error> {
            self.listings
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| Error::NotFound(path.to_string()))
        }
    }

    fn dir_node(name: &str) -> Arc<Node> {
        let attr = Attr {
            creation_time: 0,
            modification_time: 0,
            access: Access::default(),
            size: 4096,
        };
        Arc::new(Node::Directory(Directory::new(
            name.to_string(),
            Access::default(),
            attr,
        )))
    }

    #[test]
    fn upper_layer_shadows_lower_layer_entry_of_the_same_name() {
        let lower = FakeStore {
            entries: Mutex::new(HashMap::new()),
            listings: Mutex::new(HashMap::from([(
                "".to_string(),
                vec![dir_node("shared"), dir_node("only-lower")],
            )])),
        };
        let upper = FakeStore {
            entries: Mutex::new(HashMap::new()),
            listings: Mutex::new(HashMap::from([(
                "".to_string(),
                vec![dir_node("shared"), dir_node("only-upper")],
            )])),
        };
        let stacked = LayeredStore::new(vec![Arc::new(lower), Arc::new(upper)]);
        let names: std::collections::HashSet<_> = stacked
            .children("")
            .unwrap()
            .into_iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(
            names,
            std::collections::HashSet::from([
                "shared".to_string(),
                "only-lower".to_string(),
                "only-upper".to_string(),
            ])
        );
    }

    #[test]
    fn single_layer_is_a_direct_passthrough() {
        let only = FakeStore {
            entries: Mutex::new(HashMap::from([("x".to_string(), dir_node("x"))])),
            listings: Mutex::new(HashMap::new()),
        };
        let stacked = LayeredStore::new(vec![Arc::new(only)]);
        assert!(stacked.get("x").is_ok());
    }
}
