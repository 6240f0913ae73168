use std::cmp::Ordering;
use std::collections::HashMap;

use crate::Status;

/// The reply-chain fields the thread ordering needs from a post.
pub trait ThreadNode {
    fn node_id(&self) -> &str;
    fn author_id(&self) -> &str;
    fn parent_id(&self) -> Option<&str>;
    fn parent_author_id(&self) -> Option<&str>;
}

impl ThreadNode for Status {
    fn node_id(&self) -> &str {
        self.id.as_str()
    }

    fn author_id(&self) -> &str {
        self.account_id.as_str()
    }

    fn parent_id(&self) -> Option<&str> {
        self.in_reply_to_id.as_ref().map(crate::StatusId::as_str)
    }

    fn parent_author_id(&self) -> Option<&str> {
        self.in_reply_to_account_id.as_ref().map(crate::AccountId::as_str)
    }
}

/// Order descendants of a thread for reading.
///
/// Nodes are arranged depth-first under their parents. Among siblings, the root
/// author's replies to themself come first, then the rest in ascending id order.
/// A node whose parent is absent from `nodes` is treated as a top-level reply.
///
/// Malformed input with parent cycles is tolerated: nodes the traversal cannot
/// reach are appended at the end in ascending id order. The output is always a
/// permutation of the input.
#[must_use]
pub fn topo_sort<T: ThreadNode>(nodes: Vec<T>, root_account_id: &str) -> Vec<T> {
    if nodes.is_empty() {
        return nodes;
    }

    let order = traversal_order(&nodes, root_account_id);

    let mut slots = nodes.into_iter().map(Some).collect::<Vec<_>>();
    order.into_iter().filter_map(|index| slots[index].take()).collect()
}

fn traversal_order<T: ThreadNode>(nodes: &[T], root_account_id: &str) -> Vec<usize> {
    // Duplicate ids resolve to the last occurrence.
    let lookup = nodes
        .iter()
        .enumerate()
        .map(|(index, node)| (node.node_id(), index))
        .collect::<HashMap<_, _>>();

    // `None` is the virtual root.
    let mut tree: HashMap<Option<usize>, Vec<usize>> = HashMap::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        let parent = node.parent_id().and_then(|id| lookup.get(id).copied());
        tree.entry(parent).or_default().push(index);
    }

    // Reverse order: children are consumed from the end of each bucket.
    for children in tree.values_mut() {
        children.sort_by(|lhs, rhs| consumption_order(&nodes[*lhs], &nodes[*rhs], root_account_id));
    }

    let mut order = Vec::with_capacity(nodes.len());
    let mut emitted = vec![false; nodes.len()];
    let mut stack: Vec<Option<usize>> = vec![None];
    while let Some(&parent) = stack.last() {
        match tree.get_mut(&parent).and_then(Vec::pop) {
            Some(child) => {
                emitted[child] = true;
                order.push(child);
                stack.push(Some(child));
            }
            None => {
                tree.remove(&parent);
                stack.pop();
            }
        }
    }

    // Anything left is part of, or hangs off, a parent cycle.
    let mut leftovers = (0..nodes.len()).filter(|index| !emitted[*index]).collect::<Vec<_>>();
    leftovers.sort_by(|lhs, rhs| {
        nodes[*lhs].node_id().cmp(nodes[*rhs].node_id()).then_with(|| lhs.cmp(rhs))
    });
    order.extend(leftovers);
    order
}

fn is_self_reply<T: ThreadNode>(node: &T, root_account_id: &str) -> bool {
    node.author_id() == root_account_id && node.parent_author_id() == Some(root_account_id)
}

fn consumption_order<T: ThreadNode>(lhs: &T, rhs: &T, root_account_id: &str) -> Ordering {
    is_self_reply(lhs, root_account_id)
        .cmp(&is_self_reply(rhs, root_account_id))
        .then_with(|| rhs.node_id().cmp(lhs.node_id()))
}
