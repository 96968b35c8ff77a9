mod common;

use common::{Fixture, applications_menu, count_changes, describe};
use desktop_menus::{MonitorEvent, TreeFlags, TreeMonitor, WatchKind};
use std::fs;
use std::rc::Rc;

#[test]
fn test_new_desktop_file_invalidates_tree() {
    let f = Fixture::new();
    f.write_menu(
        "applications.menu",
        &applications_menu("<Include><Category>Utility</Category></Include>"),
    );
    let tree = f.lookup("applications.menu");
    let changes = count_changes(&tree);
    let before = tree.root_directory().unwrap();
    assert!(describe(&before).is_empty());
    assert!(f.service.is_watched(f.user_apps(), WatchKind::Directory));

    let created = f.write_app("foo.desktop", "Foo", "Categories=Utility;\n");
    assert!(f.notify(&created, MonitorEvent::Created) > 0);

    assert_eq!(changes.get(), 1);
    let after = tree.root_directory().unwrap();
    assert!(!after.ptr_eq(&before));
    assert_eq!(describe(&after), ["foo.desktop"]);
}

#[test]
fn test_removed_and_changed_desktop_files() {
    let f = Fixture::new();
    let a = f.write_app("a.desktop", "Alpha", "Categories=Utility;\n");
    let b = f.write_app("b.desktop", "Bravo", "Categories=Utility;\n");
    f.write_menu(
        "applications.menu",
        &applications_menu("<Include><Category>Utility</Category></Include>"),
    );
    let tree = f.lookup("applications.menu");
    let changes = count_changes(&tree);
    assert_eq!(
        describe(&tree.root_directory().unwrap()),
        ["a.desktop", "b.desktop"]
    );

    fs::remove_file(&a).unwrap();
    f.notify(&a, MonitorEvent::Deleted);
    assert_eq!(describe(&tree.root_directory().unwrap()), ["b.desktop"]);

    fs::write(
        &b,
        "[Desktop Entry]\nType=Application\nName=Bravo\nExec=true\nCategories=Office;\n",
    )
    .unwrap();
    f.notify(&b, MonitorEvent::Changed);
    assert!(describe(&tree.root_directory().unwrap()).is_empty());
    assert_eq!(changes.get(), 2);
}

#[test]
fn test_menu_file_change_reloads_layout() {
    let f = Fixture::new();
    f.write_app("a.desktop", "Alpha", "");
    let menu = f.write_menu(
        "applications.menu",
        &applications_menu("<Menu><Name>First</Name><Include><All/></Include></Menu>"),
    );
    let tree = f.lookup("applications.menu");
    let changes = count_changes(&tree);
    assert!(tree.directory_from_path("/First").is_some());
    assert!(f.service.is_watched(&menu, WatchKind::File));

    fs::write(
        &menu,
        applications_menu("<Menu><Name>Second</Name><Include><All/></Include></Menu>"),
    )
    .unwrap();
    f.notify(&menu, MonitorEvent::Changed);

    assert_eq!(changes.get(), 1);
    assert!(tree.directory_from_path("/First").is_none());
    assert!(tree.directory_from_path("/Second").is_some());
}

#[test]
fn test_menu_file_appearing_later() {
    let f = Fixture::new();
    let tree = f.lookup("applications.menu");
    let changes = count_changes(&tree);
    assert!(tree.root_directory().is_none());

    let user_menu = f.path("config/menus/applications.menu");
    let system_menu = f.path("xdg/menus/applications.menu");
    assert!(f.service.is_watched(&user_menu, WatchKind::File));
    assert!(f.service.is_watched(&system_menu, WatchKind::File));

    f.write("xdg/menus/applications.menu", "<Menu><Name>Late</Name></Menu>");
    f.notify(&system_menu, MonitorEvent::Created);

    assert_eq!(changes.get(), 1);
    assert_eq!(tree.root_directory().unwrap().menu_id(), "Late");
    assert!(f.service.is_watched(&system_menu, WatchKind::File));
}

#[test]
fn test_absolute_menu_file_appearing_later() {
    let f = Fixture::new();
    let menu = f.path("elsewhere/custom.menu");
    let tree = f.context.lookup(menu.to_str().unwrap(), TreeFlags::empty());
    let changes = count_changes(&tree);
    assert!(tree.root_directory().is_none());
    assert!(tree.menu_file().is_none());
    assert!(f.service.is_watched(&menu, WatchKind::File));

    f.write("elsewhere/custom.menu", "<Menu><Name>Custom</Name></Menu>");
    f.notify(&menu, MonitorEvent::Created);

    assert_eq!(changes.get(), 1);
    assert_eq!(tree.root_directory().unwrap().menu_id(), "Custom");
    assert_eq!(tree.canonical_path().unwrap(), menu);
    assert!(f.service.is_watched(&menu, WatchKind::File));
    let again = f.context.lookup(menu.to_str().unwrap(), TreeFlags::empty());
    assert!(again.ptr_eq(&tree));
}

#[test]
fn test_menu_file_keeps_requested_path() {
    let f = Fixture::new();
    let target = f.write_menu("real.menu", "<Menu><Name>Real</Name></Menu>");
    let link = f.path("config/menus/link.menu");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let tree = f.context.lookup(link.to_str().unwrap(), TreeFlags::empty());
    assert_eq!(tree.menu_file().unwrap(), link);
    assert_eq!(tree.canonical_path().unwrap(), target);
    assert_eq!(tree.root_directory().unwrap().menu_id(), "Real");
    assert!(f.service.is_watched(&target, WatchKind::File));

    let by_target = f.context.lookup(target.to_str().unwrap(), TreeFlags::empty());
    assert!(by_target.ptr_eq(&tree));
}

#[test]
fn test_user_menu_shadowing_system_menu() {
    let f = Fixture::new();
    f.write("xdg/menus/applications.menu", "<Menu><Name>System</Name></Menu>");
    let tree = f.lookup("applications.menu");
    assert_eq!(tree.root_directory().unwrap().menu_id(), "System");

    let user_menu = f.write_menu("applications.menu", "<Menu><Name>User</Name></Menu>");
    f.notify(&user_menu, MonitorEvent::Created);
    assert_eq!(tree.root_directory().unwrap().menu_id(), "User");
    assert!(f.service.is_watched(&user_menu, WatchKind::File));
}

#[test]
fn test_merged_files_are_watched() {
    let f = Fixture::new();
    f.write_app("pong.desktop", "Pong", "Categories=Game;\n");
    f.write_menu(
        "applications.menu",
        &applications_menu("<MergeFile>games.menu</MergeFile><DefaultMergeDirs/>"),
    );
    let games = f.write_menu(
        "games.menu",
        "<Menu><Name>Applications</Name>\
         <Menu><Name>Games</Name><Include><Category>Game</Category></Include></Menu></Menu>",
    );
    let merged_dir = f.path("config/menus/applications-merged");
    fs::create_dir_all(&merged_dir).unwrap();

    let tree = f.lookup("applications.menu");
    let changes = count_changes(&tree);
    assert!(tree.directory_from_path("/Games").is_some());
    assert!(f.service.is_watched(&games, WatchKind::File));
    assert!(f.service.is_watched(&merged_dir, WatchKind::Directory));

    // Files other than menus in a merge directory are ignored.
    let notes = f.write("config/menus/applications-merged/notes.txt", "");
    f.notify(&notes, MonitorEvent::Created);
    assert_eq!(changes.get(), 0);

    let arcade = f.write_menu(
        "applications-merged/arcade.menu",
        "<Menu><Name>Applications</Name>\
         <Menu><Name>Arcade</Name><Include><Category>Game</Category></Include></Menu></Menu>",
    );
    f.notify(&arcade, MonitorEvent::Created);
    assert_eq!(changes.get(), 1);
    assert!(tree.directory_from_path("/Arcade").is_some());
}

#[test]
fn test_lookup_returns_cached_tree() {
    let f = Fixture::new();
    let menu = f.write_menu("applications.menu", "<Menu><Name>Applications</Name></Menu>");

    let first = f.lookup("applications.menu");
    let second = f.lookup("applications.menu");
    let other_flags = f.context.lookup("applications.menu", TreeFlags::SHOW_EMPTY);
    assert!(first.ptr_eq(&second));
    assert!(!first.ptr_eq(&other_flags));

    let absolute = f.context.lookup(menu.to_str().unwrap(), TreeFlags::empty());
    let again = f.context.lookup(menu.to_str().unwrap(), TreeFlags::empty());
    assert!(absolute.ptr_eq(&again));
    assert!(!absolute.ptr_eq(&first));
    assert_eq!(absolute.menu_file().unwrap(), menu);
    assert_eq!(f.context.cached_tree_count(), 3);

    drop((first, second, other_flags, absolute, again));
    assert_eq!(f.context.cached_tree_count(), 0);
}

#[test]
fn test_dropped_tree_releases_watches_and_user_data() {
    let f = Fixture::new();
    f.write_app("a.desktop", "Alpha", "");
    let menu = f.write_menu(
        "applications.menu",
        &applications_menu("<Include><All/></Include>"),
    );
    let tree = f.lookup("applications.menu");
    tree.root_directory().unwrap();

    let marker = Rc::new(());
    tree.set_user_data(Some(Box::new(Rc::clone(&marker))));
    assert_eq!(Rc::strong_count(&marker), 2);
    assert!(tree.user_data().unwrap().downcast_ref::<Rc<()>>().is_some());
    assert!(f.service.is_watched(&menu, WatchKind::File));

    drop(tree);
    assert_eq!(Rc::strong_count(&marker), 1);
    assert!(!f.service.is_watched(&menu, WatchKind::File));
}

#[test]
fn test_monitor_registration_is_deduplicated() {
    let f = Fixture::new();
    let menu = f.write_menu("applications.menu", "<Menu><Name>Applications</Name></Menu>");
    let tree = f.lookup("applications.menu");
    tree.root_directory().unwrap();

    let hits = Rc::new(std::cell::Cell::new(0));
    let counter = Rc::clone(&hits);
    let monitor: TreeMonitor = Rc::new(move |_| counter.set(counter.get() + 1));
    tree.add_monitor(Rc::clone(&monitor));
    tree.add_monitor(Rc::clone(&monitor));

    f.notify(&menu, MonitorEvent::Changed);
    assert_eq!(hits.get(), 1);

    tree.root_directory().unwrap();
    tree.remove_monitor(&monitor);
    assert!(f.service.is_watched(&menu, WatchKind::File));
    f.notify(&menu, MonitorEvent::Changed);
    assert_eq!(hits.get(), 1);
}

#[test]
fn test_items_survive_rebuild() {
    let f = Fixture::new();
    f.write_app("a.desktop", "Alpha", "");
    f.write_menu(
        "applications.menu",
        &applications_menu("<Include><All/></Include>"),
    );
    let tree = f.lookup("applications.menu");
    let old_root = tree.root_directory().unwrap();
    let old_item = old_root.contents()[0].clone();

    let created = f.write_app("b.desktop", "Bravo", "");
    f.notify(&created, MonitorEvent::Created);

    let new_root = tree.root_directory().unwrap();
    assert_eq!(describe(&new_root), ["a.desktop", "b.desktop"]);
    assert_eq!(describe(&old_root), ["a.desktop"]);
    assert!(old_item.parent().unwrap().ptr_eq(&old_root));
    assert!(old_root.tree().is_none());
}
