//! Menu file parser.
//!
//! Reads the markup with `quick-xml` and builds a [`LayoutTree`], enforcing which elements
//! may nest where, which attributes they take, and which of them must carry text. Once an
//! element closes, `<Layout>`/`<DefaultLayout>` blocks are normalized to a canonical set of
//! `<Merge>` directives and multi-pair `<Move>` blocks are split into one block per pair.

// -- std imports
use std::{
    fs,
    path::{Path, PathBuf},
};

// -- crate imports
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use tracing::debug;

// -- module imports
use super::{LayoutTree, LayoutValues, MergeFileType, MergeType, NodeId, NodeKind};
use crate::error::LayoutError;

const MENU_SUFFIX: &str = ".menu";

const LAYOUT_ATTRIBUTES: [&str; 5] = [
    "show_empty",
    "inline",
    "inline_limit",
    "inline_header",
    "inline_alias",
];

/// Reads and parses the menu file at `path`.
///
/// The tree is named after `non_prefixed_basename` when given (so a prefixed
/// `mate-applications.menu` still resolves like `applications.menu`), otherwise after the
/// file's own basename, minus the `.menu` suffix.
///
/// # Errors
/// - [`LayoutError::Io`] if the file cannot be read.
/// - Any error of [`parse`].
pub fn load(path: &Path, non_prefixed_basename: Option<&str>) -> Result<LayoutTree, LayoutError> {
    debug!(path = %path.display(), "Loading menu file");
    let text = fs::read_to_string(path).map_err(|source| LayoutError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text, path, non_prefixed_basename)
}

/// Parses `text` as the content of the menu file at `path`.
///
/// # Errors
/// - [`LayoutError::Syntax`] for malformed markup.
/// - [`LayoutError::Invalid`] for elements, attributes, or text the grammar forbids.
/// - [`LayoutError::NoToplevelMenu`] if the document holds no `<Menu>`.
pub fn parse(
    text: &str,
    path: &Path,
    non_prefixed_basename: Option<&str>,
) -> Result<LayoutTree, LayoutError> {
    let basedir = path.parent().map(Path::to_path_buf);
    let basename = match non_prefixed_basename {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let name = basename
        .strip_suffix(MENU_SUFFIX)
        .unwrap_or(&basename)
        .to_string();

    let tree = LayoutTree::new(basedir, Some(name));
    let mut parser = Parser {
        stack_top: tree.root(),
        tree,
        path: path.to_path_buf(),
        text,
        line: 1,
        scanned: 0,
        pending_text: String::new(),
    };

    let mut reader = Reader::from_str(text);
    reader.trim_text(false);

    loop {
        parser.advance(reader.buffer_position());
        let event = reader.read_event().map_err(|source| LayoutError::Syntax {
            path: path.to_path_buf(),
            source,
        })?;

        match event {
            Event::Start(element) => parser.start_element(&element)?,
            Event::Empty(element) => {
                parser.start_element(&element)?;
                parser.end_element()?;
            }
            Event::End(_) => parser.end_element()?,
            Event::Text(t) => {
                let unescaped = t.unescape().map_err(|source| parser.syntax(source))?;
                parser.text(&unescaped)?;
            }
            Event::CData(c) => parser.text(&String::from_utf8_lossy(&c))?,
            Event::Comment(t) | Event::PI(t) | Event::DocType(t) => {
                parser.passthrough(String::from_utf8_lossy(&t).into_owned());
            }
            Event::Decl(_) => {}
            Event::Eof => break,
        }
    }

    if parser.stack_top != parser.tree.root() {
        let open = parser.tree.kind(parser.stack_top).element_name();
        return Err(parser.invalid(format!("document ends inside <{open}>")));
    }

    let root = parser.tree.root();
    if parser.tree.find_menu_child(root).is_none() {
        return Err(LayoutError::NoToplevelMenu {
            path: path.to_path_buf(),
        });
    }

    Ok(parser.tree)
}

struct Parser<'a> {
    tree: LayoutTree,
    stack_top: NodeId,
    path: PathBuf,
    text: &'a str,
    line: usize,
    scanned: usize,
    pending_text: String,
}

impl Parser<'_> {
    fn advance(&mut self, position: usize) {
        let end = position.min(self.text.len());
        if end > self.scanned {
            let chunk = self.text.as_bytes().get(self.scanned..end).unwrap_or_default();
            self.line += chunk.iter().filter(|&&b| b == b'\n').count();
            self.scanned = end;
        }
    }

    fn invalid(&self, message: impl AsRef<str>) -> LayoutError {
        LayoutError::invalid(self.path.clone(), format!("line {}: {}", self.line, message.as_ref()))
    }

    fn syntax(&self, source: quick_xml::Error) -> LayoutError {
        LayoutError::Syntax {
            path: self.path.clone(),
            source,
        }
    }

    fn top_kind(&self) -> &NodeKind {
        self.tree.kind(self.stack_top)
    }

    fn has_child(&self, node: NodeId, pred: impl Fn(&NodeKind) -> bool) -> bool {
        self.tree
            .children(node)
            .iter()
            .any(|&c| pred(self.tree.kind(c)))
    }

    fn push(&mut self, kind: NodeKind) {
        let node = self.tree.new_node(kind, None);
        self.tree.append_child(self.stack_top, node);
        self.stack_top = node;
        self.pending_text.clear();
    }

    /// Values of the `allowed` attributes, in the same order.
    fn attributes(
        &self,
        element: &BytesStart<'_>,
        element_name: &str,
        allowed: &[&str],
    ) -> Result<Vec<Option<String>>, LayoutError> {
        let mut values = vec![None; allowed.len()];

        for attribute in element.attributes() {
            let attribute = attribute.map_err(|e| self.syntax(e.into()))?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();

            let Some(index) = allowed.iter().position(|a| *a == key) else {
                return Err(self.invalid(format!(
                    "Attribute \"{key}\" is invalid on <{element_name}> element in this context"
                )));
            };
            if values[index].is_some() {
                return Err(self.invalid(format!(
                    "Attribute \"{key}\" repeated twice on the same <{element_name}> element"
                )));
            }
            let value = attribute
                .unescape_value()
                .map_err(|source| self.syntax(source))?;
            values[index] = Some(value.into_owned());
        }

        Ok(values)
    }

    fn no_attributes(&self, element: &BytesStart<'_>, element_name: &str) -> Result<(), LayoutError> {
        self.attributes(element, element_name, &[]).map(|_| ())
    }

    fn layout_values(
        &self,
        element: &BytesStart<'_>,
        element_name: &str,
    ) -> Result<LayoutValues, LayoutError> {
        let values = self.attributes(element, element_name, &LAYOUT_ATTRIBUTES)?;
        Ok(LayoutValues::from_attributes(
            values[0].as_deref(),
            values[1].as_deref(),
            values[2].as_deref(),
            values[3].as_deref(),
            values[4].as_deref(),
        ))
    }

    fn start_element(&mut self, element: &BytesStart<'_>) -> Result<(), LayoutError> {
        let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
        let root = self.tree.root();

        if name == "Menu" {
            if self.stack_top == root && self.has_child(root, NodeKind::is_menu) {
                return Err(self.invalid(
                    "Multiple root elements in menu file, only one toplevel <Menu> is allowed",
                ));
            }
            self.no_attributes(element, &name)?;
            if !matches!(self.top_kind(), NodeKind::Root | NodeKind::Menu(_)) {
                return Err(self.invalid(
                    "<Menu> element can only appear below other <Menu> elements or at toplevel",
                ));
            }
            self.push(NodeKind::menu());
            return Ok(());
        }

        if self.stack_top == root {
            return Err(self.invalid(format!(
                "Root element in a menu file must be <Menu>, not <{name}>"
            )));
        }

        match self.top_kind().element_name() {
            "Menu" => self.start_menu_child(element, &name),
            "Include" | "Exclude" | "And" | "Or" | "Not" => self.start_matching_rule(element, &name),
            "Move" => self.start_move_child(element, &name),
            "Layout" | "DefaultLayout" => self.start_layout_child(element, &name),
            _ => Err(self.invalid(format!(
                "Element <{name}> may not appear in this context"
            ))),
        }
    }

    fn start_menu_child(&mut self, element: &BytesStart<'_>, name: &str) -> Result<(), LayoutError> {
        let kind = match name {
            "LegacyDir" => {
                let values = self.attributes(element, name, &["prefix"])?;
                NodeKind::LegacyDir {
                    prefix: values.into_iter().next().flatten(),
                }
            }
            "MergeFile" => {
                let values = self.attributes(element, name, &["type"])?;
                let merge_type = match values[0].as_deref() {
                    Some("parent") => MergeFileType::Parent,
                    _ => MergeFileType::Path,
                };
                NodeKind::MergeFile(merge_type)
            }
            "DefaultLayout" => NodeKind::DefaultLayout(self.layout_values(element, name)?),
            _ => {
                self.no_attributes(element, name)?;
                match name {
                    "AppDir" => NodeKind::AppDir,
                    "DefaultAppDirs" => NodeKind::DefaultAppDirs,
                    "DirectoryDir" => NodeKind::DirectoryDir,
                    "DefaultDirectoryDirs" => NodeKind::DefaultDirectoryDirs,
                    "DefaultMergeDirs" => NodeKind::DefaultMergeDirs,
                    "Name" => {
                        if self.has_child(self.stack_top, |k| matches!(k, NodeKind::Name)) {
                            return Err(self.invalid(
                                "Multiple <Name> elements in a <Menu> element is not allowed",
                            ));
                        }
                        NodeKind::Name
                    }
                    "Directory" => NodeKind::Directory,
                    "OnlyUnallocated" => NodeKind::OnlyUnallocated,
                    "NotOnlyUnallocated" => NodeKind::NotOnlyUnallocated,
                    "Include" => NodeKind::Include,
                    "Exclude" => NodeKind::Exclude,
                    "MergeDir" => NodeKind::MergeDir,
                    "KDELegacyDirs" => NodeKind::KdeLegacyDirs,
                    "Move" => NodeKind::Move,
                    "Deleted" => NodeKind::Deleted,
                    "NotDeleted" => NodeKind::NotDeleted,
                    "Layout" => NodeKind::Layout,
                    _ => {
                        return Err(self.invalid(format!(
                            "Element <{name}> may not appear below <Menu>"
                        )));
                    }
                }
            }
        };
        self.push(kind);
        Ok(())
    }

    fn start_matching_rule(&mut self, element: &BytesStart<'_>, name: &str) -> Result<(), LayoutError> {
        self.no_attributes(element, name)?;
        let kind = match name {
            "Filename" => NodeKind::Filename,
            "Category" => NodeKind::Category,
            "All" => NodeKind::All,
            "And" => NodeKind::And,
            "Or" => NodeKind::Or,
            "Not" => NodeKind::Not,
            _ => {
                return Err(self.invalid(format!(
                    "Element <{name}> may not appear in this context"
                )));
            }
        };
        self.push(kind);
        Ok(())
    }

    fn start_move_child(&mut self, element: &BytesStart<'_>, name: &str) -> Result<(), LayoutError> {
        self.no_attributes(element, name)?;
        let kind = match name {
            "Old" => NodeKind::Old,
            "New" => NodeKind::New,
            _ => {
                return Err(self.invalid(format!(
                    "Element <{name}> may not appear below <Move>"
                )));
            }
        };
        self.push(kind);
        Ok(())
    }

    fn start_layout_child(&mut self, element: &BytesStart<'_>, name: &str) -> Result<(), LayoutError> {
        let kind = match name {
            "Menuname" => NodeKind::Menuname(self.layout_values(element, name)?),
            "Merge" => {
                let values = self.attributes(element, name, &["type"])?;
                NodeKind::Merge(MergeType::from_attribute(values[0].as_deref()))
            }
            _ => {
                self.no_attributes(element, name)?;
                match name {
                    "Filename" => NodeKind::Filename,
                    "Separator" => NodeKind::Separator,
                    _ => {
                        let layout = self.top_kind().element_name();
                        return Err(self.invalid(format!(
                            "Element <{name}> may not appear below <{layout}>"
                        )));
                    }
                }
            }
        };
        self.push(kind);
        Ok(())
    }

    fn end_element(&mut self) -> Result<(), LayoutError> {
        let node = self.stack_top;
        let element_name = self.top_kind().element_name();

        if takes_text(self.top_kind()) {
            let trimmed = self.pending_text.trim();
            let content = (!trimmed.is_empty()).then(|| trimmed.to_string());
            self.pending_text.clear();

            let required = !matches!(self.top_kind(), NodeKind::MergeFile(_));
            if content.is_none() && required {
                return Err(self.invalid(format!(
                    "Element <{element_name}> is required to contain text and was empty"
                )));
            }
            self.tree.set_content(node, content);
        }

        match element_name {
            "Menu" => {
                if !self.has_child(node, |k| matches!(k, NodeKind::Name)) {
                    return Err(
                        self.invalid("<Menu> elements are required to contain a <Name> element")
                    );
                }
            }
            "Layout" | "DefaultLayout" => fixup_layout(&mut self.tree, node),
            "Move" => self.fixup_move(node)?,
            _ => {}
        }

        if let Some(parent) = self.tree.parent(node) {
            self.stack_top = parent;
        }
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<(), LayoutError> {
        if takes_text(self.top_kind()) {
            self.pending_text.push_str(text);
            return Ok(());
        }
        if !text.trim().is_empty() {
            let element_name = self.top_kind().element_name();
            return Err(self.invalid(format!(
                "No text is allowed inside element <{element_name}>"
            )));
        }
        Ok(())
    }

    fn passthrough(&mut self, content: String) {
        let node = self.tree.new_node(NodeKind::Passthrough, Some(content));
        self.tree.append_child(self.stack_top, node);
    }

    /// Checks that `<Old>`/`<New>` come in pairs and gives every extra pair its own `<Move>`
    /// right after the original one.
    fn fixup_move(&mut self, node: NodeId) -> Result<(), LayoutError> {
        let mut pairs: Vec<[NodeId; 2]> = Vec::new();
        let mut pending_old = None;

        for &child in self.tree.children(node) {
            match (self.tree.kind(child), pending_old) {
                (NodeKind::Old, None) => pending_old = Some(child),
                (NodeKind::New, Some(old)) => {
                    pairs.push([old, child]);
                    pending_old = None;
                }
                (NodeKind::Old | NodeKind::New, _) => {
                    return Err(self.invalid("<Old>/<New> elements not paired properly"));
                }
                _ => {}
            }
        }

        if pending_old.is_some() {
            return Err(self.invalid("<Old>/<New> elements not paired properly"));
        }
        if pairs.is_empty() {
            return Err(self.invalid("<Old>/<New> elements missing under <Move>"));
        }

        let mut append_after = node;
        for [old, new] in pairs.into_iter().skip(1) {
            let split = self.tree.new_node(NodeKind::Move, None);
            self.tree.insert_after(append_after, split);
            self.tree.append_child(split, old);
            self.tree.append_child(split, new);
            append_after = split;
        }
        Ok(())
    }
}

/// Kinds whose text is kept as content.
fn takes_text(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::AppDir
            | NodeKind::DirectoryDir
            | NodeKind::Name
            | NodeKind::Directory
            | NodeKind::Filename
            | NodeKind::Category
            | NodeKind::MergeFile(_)
            | NodeKind::MergeDir
            | NodeKind::LegacyDir { .. }
            | NodeKind::Old
            | NodeKind::New
            | NodeKind::Menuname(_)
    )
}

/// Leaves a layout block with either one `all` merge, or one `menus` and one `files` merge.
///
/// Surplus merges are dropped keeping the last of each type (an `all` merge wins over the
/// other two); missing `menus` and `files` merges are appended in that order. Empty blocks
/// are left alone.
fn fixup_layout(tree: &mut LayoutTree, node: NodeId) {
    if tree.children(node).is_empty() {
        return;
    }

    let merges: Vec<(NodeId, MergeType)> = tree
        .children(node)
        .iter()
        .filter_map(|&c| match tree.kind(c) {
            NodeKind::Merge(merge_type) => Some((c, *merge_type)),
            _ => None,
        })
        .collect();

    let last_of = |wanted: MergeType| {
        merges
            .iter()
            .rev()
            .find(|(_, t)| *t == wanted)
            .map(|(c, _)| *c)
    };
    let count = |wanted: MergeType| merges.iter().filter(|(_, t)| *t == wanted).count();

    let (n_all, n_menus, n_files) = (
        count(MergeType::All),
        count(MergeType::Menus),
        count(MergeType::Files),
    );
    let (last_all, last_menus, last_files) = (
        last_of(MergeType::All),
        last_of(MergeType::Menus),
        last_of(MergeType::Files),
    );

    if (n_all == 1 && n_menus == 0 && n_files == 0) || (n_all == 0 && n_menus == 1 && n_files == 1)
    {
        return;
    }

    if n_all > 1 || n_menus > 1 || n_files > 1 || (n_all == 1 && (n_menus != 0 || n_files != 0)) {
        for &(child, merge_type) in &merges {
            let remove = match merge_type {
                MergeType::None => false,
                MergeType::Menus => n_all > 0 || Some(child) != last_menus,
                MergeType::Files => n_all > 0 || Some(child) != last_files,
                MergeType::All => Some(child) != last_all,
            };
            if remove {
                debug!(merge = ?merge_type, "Removing duplicated layout merge");
                tree.unlink(child);
            }
        }
    }

    if n_all == 0 && n_menus == 0 {
        let merge = tree.new_node(NodeKind::Merge(MergeType::Menus), None);
        tree.append_child(node, merge);
    }
    if n_all == 0 && n_files == 0 {
        let merge = tree.new_node(NodeKind::Merge(MergeType::Files), None);
        tree.append_child(node, merge);
    }
}
