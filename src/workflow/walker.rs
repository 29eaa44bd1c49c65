use crate::workflow::types::DesignNode;

/// Position of a visited node relative to the walk root.
#[derive(Debug, Clone, Copy)]
pub struct VisitContext<'a> {
    pub depth: usize,
    pub parent: Option<&'a DesignNode>,
}

/// Pre-order walk: every node exactly once, parent before children,
/// siblings in declaration order. An absent root is an empty walk.
///
/// Uses an explicit stack so deeply nested documents cannot exhaust the
/// call stack.
pub fn walk<'a>(
    root: Option<&'a DesignNode>,
    visitor: &mut impl FnMut(&'a DesignNode, VisitContext<'a>),
) {
    let Some(root) = root else {
        return;
    };

    let mut stack = vec![(
        root,
        VisitContext {
            depth: 0,
            parent: None,
        },
    )];
    while let Some((node, context)) = stack.pop() {
        visitor(node, context);
        for child in node.children.iter().rev() {
            stack.push((
                child,
                VisitContext {
                    depth: context.depth + 1,
                    parent: Some(node),
                },
            ));
        }
    }
}

pub fn visit_nodes<'a>(node: &'a DesignNode, visitor: &mut impl FnMut(&'a DesignNode)) {
    walk(Some(node), &mut |candidate, _| visitor(candidate));
}

/// Descendants of `node`, excluding `node` itself.
pub fn any_descendant(node: &DesignNode, predicate: impl Fn(&DesignNode) -> bool) -> bool {
    node.children.iter().any(|child| {
        let mut found = false;
        visit_nodes(child, &mut |candidate| {
            if !found && predicate(candidate) {
                found = true;
            }
        });
        found
    })
}

#[cfg(test)]
pub(crate) fn find_node_by_id<'a>(node: &'a DesignNode, id: &str) -> Option<&'a DesignNode> {
    let mut found = None;
    visit_nodes(node, &mut |candidate| {
        if found.is_none() && candidate.id == id {
            found = Some(candidate);
        }
    });
    found
}

pub fn count_nodes(root: Option<&DesignNode>) -> usize {
    let mut count = 0;
    walk(root, &mut |_, _| count += 1);
    count
}
