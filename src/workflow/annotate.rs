use std::borrow::Cow;

use tracing::{debug, info};

use crate::workflow::types::{AssetMap, DesignNode};
use crate::workflow::walker::walk;

pub const USAGE_INSTRUCTION_PREFIX: &str = "USE THIS IMAGE SOURCE: ";

pub fn usage_instruction(local_path: &str) -> String {
    format!("{USAGE_INSTRUCTION_PREFIX}{local_path}")
}

/// Tree with every node whose id is in `assets` carrying its local path and
/// usage instruction. Borrows the input unchanged when no node needs
/// updating, so annotating an already annotated tree is free.
pub fn annotate_tree<'a>(root: &'a DesignNode, assets: &AssetMap) -> Cow<'a, DesignNode> {
    let mut stale = false;
    walk(Some(root), &mut |node, _| {
        if !stale && needs_annotation(node, assets) {
            stale = true;
        }
    });
    if !stale {
        return Cow::Borrowed(root);
    }

    let mut annotated = root.clone();
    annotate_in_place(&mut annotated, assets);
    Cow::Owned(annotated)
}

/// Writes annotations into a tree the caller owns. Returns how many nodes
/// matched an asset.
pub fn annotate_in_place(root: &mut DesignNode, assets: &AssetMap) -> usize {
    if assets.is_empty() {
        return 0;
    }

    let mut matched = 0;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if let Some(local_path) = assets.get(&node.id) {
            debug!(node = %node.id, path = %local_path, "annotating image node");
            node.set_local_source(local_path.clone(), usage_instruction(local_path));
            matched += 1;
        }
        stack.extend(node.children.iter_mut());
    }
    info!(matched, assets = assets.len(), "tree annotated");
    matched
}

fn needs_annotation(node: &DesignNode, assets: &AssetMap) -> bool {
    let Some(local_path) = assets.get(&node.id) else {
        return false;
    };
    node.local_src.as_deref() != Some(local_path.as_str())
        || node.usage_instruction.as_deref() != Some(usage_instruction(local_path).as_str())
}
