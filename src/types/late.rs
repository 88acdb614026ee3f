use super::{Type, TypeKind};
use crate::error::{EngineError, EngineResult};
use once_cell::sync::OnceCell;
use std::sync::Arc;

pub(crate) type LateFactory = Arc<dyn Fn() -> Option<Type> + Send + Sync>;

pub(crate) struct LateType {
    name: String,
    factory: LateFactory,
    resolved: OnceCell<Type>,
}

pub(crate) fn late_type(name: String, factory: LateFactory) -> Type {
    Type::new(
        name.clone(),
        TypeKind::Late(LateType {
            name,
            factory,
            resolved: OnceCell::new(),
        }),
    )
}

impl LateType {
    /// The produced type. A factory that yields nothing is asked again next time.
    pub(crate) fn resolve(&self) -> Option<Type> {
        if let Some(ty) = self.resolved.get() {
            return Some(ty.clone());
        }
        let ty = (self.factory)()?;
        Some(self.resolved.get_or_init(|| ty).clone())
    }

    pub(crate) fn resolve_or_err(&self) -> EngineResult<Type> {
        self.resolve()
            .ok_or_else(|| EngineError::invariant(self.unresolved_message()))
    }

    pub(crate) fn unresolved_message(&self) -> String {
        format!("late type `{}` could not be resolved", self.name)
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{self, Type};
    use once_cell::sync::Lazy;
    use serde_json::json;

    static TREE_NODE: Lazy<Type> = Lazy::new(|| {
        types::model("TreeNode")
            .prop("label", types::string())
            .prop(
                "children",
                types::optional(types::array(types::late("TreeNode", || TREE_NODE.clone())), json!([])),
            )
            .build()
            .unwrap()
    });

    #[test]
    fn recursive_shapes_validate() {
        let value = json!({"label": "a", "children": [{"label": "b", "children": [{"label": "c"}]}]});
        assert!(TREE_NODE.is(&value));
        let result = TREE_NODE.validate(&json!({"label": "a", "children": [{"label": 1}]}));
        assert_eq!(result.errors()[0].path(), "/children/0/label");
        assert_eq!(
            TREE_NODE.describe(),
            "{ label: string; children: TreeNode[]? }"
        );
    }

    #[test]
    fn unresolved_late_type_fails_validation() {
        let never = types::late_fallible("Never", || None);
        let result = never.validate(&json!(1));
        assert!(result.errors()[0].to_string().contains("could not be resolved"));
    }
}
