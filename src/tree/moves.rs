//! Duplicate stripping and `<Move>` execution on a resolved layout tree.

// -- std imports
use std::collections::{HashMap, HashSet};

// -- crate imports
use tracing::debug;

// -- module imports
use crate::layout::{LayoutTree, NodeId, NodeKind};

/// Collapses duplicate directives and same-named sibling menus below `node`.
///
/// Of several identical `<AppDir>`, `<DirectoryDir>` or `<Directory>` children the last
/// one survives. Sibling menus with the same name are folded into the last of them; the
/// folded children keep their document order in front of the survivor's own.
pub(crate) fn strip_duplicate_children(tree: &mut LayoutTree, node: NodeId) {
    let children = tree.children(node).to_vec();

    let mut seen: HashSet<(&'static str, Option<String>)> = HashSet::new();
    for &child in children.iter().rev() {
        let kind = tree.kind(child);
        if !matches!(
            kind,
            NodeKind::AppDir | NodeKind::DirectoryDir | NodeKind::Directory
        ) {
            continue;
        }
        let key = (kind.element_name(), tree.content(child).map(str::to_string));
        if !seen.insert(key) {
            tree.unlink(child);
        }
    }

    let menus: Vec<NodeId> = children
        .iter()
        .copied()
        .filter(|&child| tree.kind(child).is_menu())
        .collect();
    let mut survivors: HashMap<Option<String>, NodeId> = HashMap::new();
    for &menu in menus.iter().rev() {
        let name = tree.menu_name(menu).map(str::to_string);
        match survivors.get(&name) {
            Some(&survivor) => {
                debug!(menu = ?name, "Folding duplicate menu");
                move_children(tree, menu, survivor);
                tree.unlink(menu);
            }
            None => {
                survivors.insert(name, menu);
            }
        }
    }

    let children = tree.children(node).to_vec();
    for child in children {
        if tree.kind(child).is_menu() {
            strip_duplicate_children(tree, child);
        }
    }
}

/// Moves every child of `from` except its `<Name>` in front of the children of `to`.
fn move_children(tree: &mut LayoutTree, from: NodeId, to: NodeId) {
    let insert_before = tree.children(to).first().copied();
    let children = tree.children(from).to_vec();
    for child in children {
        tree.steal(child);
        if matches!(tree.kind(child), NodeKind::Name) {
            continue;
        }
        match insert_before {
            Some(before) => tree.insert_before(before, child),
            None => tree.append_child(to, child),
        }
    }
}

/// Applies the `<Move>` directives below `node`, innermost menus first.
///
/// `need_strip` collects whether any move found its source; at the outermost call it is
/// `None` and duplicates are stripped once if needed.
pub(crate) fn execute_moves(tree: &mut LayoutTree, node: NodeId, need_strip: Option<&mut bool>) {
    let mut moved = false;
    let mut moves = Vec::new();

    let children = tree.children(node).to_vec();
    for child in children {
        match tree.kind(child) {
            NodeKind::Menu(_) => execute_moves(tree, child, Some(&mut moved)),
            NodeKind::Move => moves.push(child),
            _ => {}
        }
    }

    for directive in moves {
        let old = tree.move_old(directive).map(str::to_string);
        let new = tree.move_new(directive).map(str::to_string);
        if let (Some(old), Some(new)) = (old, new) {
            if let Some(old_node) = find_submenu(tree, node, &old, false) {
                moved = true;
                debug!(old = %old, new = %new, "Moving menu");
                match find_submenu(tree, node, &new, true) {
                    Some(new_node) if new_node != old_node => {
                        move_children(tree, old_node, new_node);
                        tree.unlink(old_node);
                    }
                    Some(_) => {}
                    None => tree.unlink(old_node),
                }
            }
        }
        tree.unlink(directive);
    }

    match need_strip {
        Some(flag) => *flag |= moved,
        None => {
            if moved {
                strip_duplicate_children(tree, node);
            }
        }
    }
}

/// The menu at the slash separated `path` below `layout`, created on demand if `create`.
fn find_submenu(
    tree: &mut LayoutTree,
    layout: NodeId,
    path: &str,
    create: bool,
) -> Option<NodeId> {
    if path.is_empty() || path.starts_with('/') {
        return None;
    }
    let (name, rest) = match path.split_once('/') {
        Some((name, rest)) if !rest.is_empty() => (name, Some(rest)),
        Some((name, _)) => (name, None),
        None => (path, None),
    };

    let existing = tree
        .children(layout)
        .iter()
        .copied()
        .find(|&child| tree.kind(child).is_menu() && tree.menu_name(child) == Some(name));

    let submenu = match existing {
        Some(submenu) => submenu,
        None if create => {
            let submenu = tree.new_node(NodeKind::menu(), None);
            tree.append_child(layout, submenu);
            let name_node = tree.new_node(NodeKind::Name, Some(name.to_string()));
            tree.append_child(submenu, name_node);
            submenu
        }
        None => return None,
    };

    match rest {
        Some(rest) => find_submenu(tree, submenu, rest, create),
        None => Some(submenu),
    }
}
