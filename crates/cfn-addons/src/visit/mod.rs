//! visitor pattern helpers
mod visit_intrinsics;
pub use visit_intrinsics::VisitIntrinsics;

use serde_json::Value;

/// Visitor that is called for every intrinsic function call in a template tree
///
/// An intrinsic is a single-key object whose key is `Ref`, `Condition` or starts with
/// `Fn::`. `pointer` is the JSON pointer of that object.
pub trait IntrinsicVisitor {
    fn visit_intrinsic(&mut self, name: &str, argument: &Value, pointer: &str);
}

// blanket impl for FnMut
impl<F> IntrinsicVisitor for F
where
    F: FnMut(&str, &Value, &str),
{
    fn visit_intrinsic(&mut self, name: &str, argument: &Value, pointer: &str) {
        self(name, argument, pointer)
    }
}
