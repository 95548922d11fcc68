use std::rc::Rc;


// Abstract over various memory management strategies.
pub type Node<T> = Rc<T>;
pub type Seq<T> = Vec<Node<T>>;


// The closed set of node kinds the evaluation core consumes. The
// parser produces richer trees; by the time a subtree reaches the
// function manager it has been reduced to these.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AstKind {
    StringLiteral,
    NumericLiteral,
    BooleanLiteral,
    RegexLiteral,
    CaseInsensitiveRegexLiteral,
    FieldName,
    ContextVariable,
    Function,
}


// One parse node: the token text, its kind, and ordered children.
// For Function nodes the text is the operator or function name and
// the children are its arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct AstNode {
    pub text: String,
    pub kind: AstKind,
    pub children: Seq<AstNode>,
}


impl AstNode {
    pub fn leaf(text: &str, kind: AstKind) -> Node<AstNode> {
        Node::new(AstNode {
            text: String::from(text),
            kind,
            children: Vec::new(),
        })
    }

    pub fn call(name: &str, args: Seq<AstNode>) -> Node<AstNode> {
        Node::new(AstNode {
            text: String::from(name),
            kind: AstKind::Function,
            children: args,
        })
    }

    pub fn arity(&self) -> usize {
        self.children.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_shape() {
        let node = AstNode::call(
            "+",
            vec![
                AstNode::leaf("1", AstKind::NumericLiteral),
                AstNode::leaf("2", AstKind::NumericLiteral),
            ],
        );
        assert_eq!(node.kind, AstKind::Function);
        assert_eq!(node.text, "+");
        assert_eq!(node.arity(), 2);
        assert_eq!(node.children[0].kind, AstKind::NumericLiteral);
    }
}
