//! Binary asset node
//!
//! Resources (images, iframes' local targets) carry no structural data;
//! loading one only records whether the file exists. The single check
//! catches two resources whose paths differ only by case, which breaks
//! repositories on case-insensitive filesystems.

use std::sync::{Arc, Weak};

use crate::bundle::Bundle;
use crate::fileish::{
    AnyNode, Fileish, ModelError, NodeBase, NodeKind, ValidationCheck, ValidationKind,
};
use crate::location::NOWHERE;

pub struct Resource {
    base: NodeBase,
    me: Weak<Resource>,
}

impl Resource {
    pub fn new(bundle: Weak<Bundle>, abs_path: String) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            base: NodeBase::new(bundle, abs_path),
            me: me.clone(),
        })
    }
}

impl Fileish for Resource {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn node_kind(&self) -> NodeKind {
        NodeKind::Resource
    }

    fn any_node(&self) -> AnyNode {
        AnyNode::Resource(self.me.upgrade().expect("node still referenced"))
    }

    fn has_parser(&self) -> bool {
        false
    }

    fn parse(&self, _content: &str) -> Result<(), ModelError> {
        Ok(())
    }

    fn validation_checks(&self) -> Vec<ValidationCheck> {
        let bundle = self.base.bundle();
        let my_path = self.abs_path().to_string();
        vec![ValidationCheck {
            kind: ValidationKind::DuplicateResourcePath,
            nodes_to_load: Default::default(),
            evaluate: Box::new(move || {
                let my_lower = my_path.to_lowercase();
                for other in bundle.resources().all() {
                    if other.abs_path() == my_path {
                        continue;
                    }
                    if other.abs_path().to_lowercase() == my_lower {
                        return vec![NOWHERE];
                    }
                }
                Vec::new()
            }),
        }]
    }
}
