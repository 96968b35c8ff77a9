//! Process-level services shared by every menu tree.
//!
//! A [`MenuContext`] bundles the search environment, the watch hub, the cached directory
//! registry and the tree cache. Create one per session; trees keep it alive.

// -- std imports
use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
};

// -- crate imports
use tracing::debug;

// -- module imports
use crate::{
    desktop_entries::EntryLoader,
    entry_directories::EntryCache,
    linux_fs::Environment,
    monitor::{WatchHub, WatchService},
    tree::{MenuTree, TreeFlags, TreeInner},
};

/// Handle to the shared services; cloning is cheap.
#[derive(Clone)]
pub struct MenuContext(Rc<ContextInner>);

struct ContextInner {
    env: Environment,
    hub: Rc<WatchHub>,
    entries: Rc<EntryCache>,
    trees: RefCell<HashMap<String, Weak<TreeInner>>>,
}

impl fmt::Debug for MenuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuContext")
            .field("env", &self.0.env)
            .field("hub", &self.0.hub)
            .field("trees", &self.0.trees.borrow().len())
            .finish()
    }
}

impl MenuContext {
    pub fn new(env: Environment, service: Box<dyn WatchService>) -> Self {
        let hub = WatchHub::new(service);
        let loader = EntryLoader::new(env.desktop_name.clone(), env.path_env.clone());
        let entries = EntryCache::new(Rc::clone(&hub), loader);
        Self(Rc::new(ContextInner {
            env,
            hub,
            entries,
            trees: RefCell::new(HashMap::new()),
        }))
    }

    pub fn environment(&self) -> &Environment {
        &self.0.env
    }

    pub fn hub(&self) -> &Rc<WatchHub> {
        &self.0.hub
    }

    pub fn entry_cache(&self) -> &Rc<EntryCache> {
        &self.0.entries
    }

    /// Shorthand for [`MenuTree::lookup`].
    pub fn lookup(&self, menu_file: &str, flags: TreeFlags) -> MenuTree {
        MenuTree::lookup(self, menu_file, flags)
    }

    /// Delivers every pending filesystem notification.
    ///
    /// Tree monitors registered with [`MenuTree::add_monitor`] run from inside this call.
    /// Returns the number of notifications delivered.
    pub fn process_events(&self) -> usize {
        self.0.hub.dispatch_pending()
    }

    /// Number of live trees in the cache.
    pub fn cached_tree_count(&self) -> usize {
        self.0
            .trees
            .borrow()
            .values()
            .filter(|tree| tree.strong_count() > 0)
            .count()
    }

    pub(crate) fn cached_tree(&self, key: &str) -> Option<MenuTree> {
        self.0
            .trees
            .borrow()
            .get(key)
            .and_then(Weak::upgrade)
            .map(MenuTree::from_inner)
    }

    pub(crate) fn cache_tree(&self, key: String, tree: &Rc<TreeInner>) {
        debug!(key = %key, "Adding menu tree to cache");
        self.0.trees.borrow_mut().insert(key, Rc::downgrade(tree));
    }

    /// Drops the cache slot `key` if it still belongs to `tree`.
    pub(crate) fn uncache_tree(&self, key: &str, tree: *const TreeInner) {
        let now_empty = {
            let mut trees = self.0.trees.borrow_mut();
            if trees.get(key).is_some_and(|weak| weak.as_ptr() == tree) {
                debug!(key = %key, "Removing menu tree from cache");
                trees.remove(key);
            }
            trees.retain(|_, weak| weak.strong_count() > 0);
            trees.is_empty()
        };
        if now_empty {
            debug!("Menu tree cache empty, dropping desktop entry memo");
            self.0.entries.empty_desktop_cache();
        }
    }
}
