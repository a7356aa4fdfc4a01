use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathType {
    Path,
    Branch,
}

#[derive(Debug)]
pub struct PathNode {
    pub kind: PathType,
    pub parent: Option<Rc<PathNode>>,
}

impl PathNode {
    pub fn new(kind: PathType, parent: Option<Rc<PathNode>>) -> Rc<PathNode> {
        Rc::new(PathNode { kind, parent })
    }

    pub fn path(parent: Option<Rc<PathNode>>) -> Rc<PathNode> {
        PathNode::new(PathType::Path, parent)
    }

    pub fn branch(parent: Option<Rc<PathNode>>) -> Rc<PathNode> {
        PathNode::new(PathType::Branch, parent)
    }

    /// This node and its ancestors, root first.
    fn root_first(self: &Rc<PathNode>) -> Vec<Rc<PathNode>> {
        let mut out = Vec::new();
        let mut node = Some(self.clone());
        while let Some(n) = node {
            node = n.parent.clone();
            out.push(n);
        }
        out.reverse();
        out
    }

    /// Whether `ancestor` is this node or lies above it.
    pub fn descends_from(self: &Rc<PathNode>, ancestor: &Rc<PathNode>) -> bool {
        let mut node = Some(self.clone());
        while let Some(n) = node {
            if Rc::ptr_eq(&n, ancestor) {
                return true;
            }
            node = n.parent.clone();
        }
        false
    }
}

/// The deepest node shared by both chains, compared by identity.
pub fn common_path(a: &Rc<PathNode>, b: &Rc<PathNode>) -> Option<Rc<PathNode>> {
    let xs = a.root_first();
    let ys = b.root_first();
    let mut common = None;
    for (x, y) in xs.iter().zip(ys.iter()) {
        if !Rc::ptr_eq(x, y) {
            break;
        }
        common = Some(x.clone());
    }
    common
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_uses_share_a_path() {
        let root = PathNode::path(None);
        let body = PathNode::path(Some(root.clone()));
        let common = common_path(&body, &root).unwrap();
        assert!(Rc::ptr_eq(&common, &root));
        assert_eq!(common.kind, PathType::Path);
    }

    #[test]
    fn sibling_branches_meet_at_the_branch() {
        let root = PathNode::path(None);
        let branch = PathNode::branch(Some(root.clone()));
        let then = PathNode::path(Some(branch.clone()));
        let otherwise = PathNode::path(Some(branch.clone()));
        let common = common_path(&then, &otherwise).unwrap();
        assert!(Rc::ptr_eq(&common, &branch));
        assert_eq!(common.kind, PathType::Branch);
        assert!(then.descends_from(&root));
        assert!(!then.descends_from(&otherwise));
    }

    #[test]
    fn unrelated_chains_share_nothing() {
        let a = PathNode::path(None);
        let b = PathNode::path(None);
        assert!(common_path(&a, &b).is_none());
    }
}
