// src/project/menu.rs

//! Plugin menu tree.
//!
//! On disk a menu item is `"-"` (separator), a command identifier string, or
//! an object `{ "title": ..., "items": [...] }`. That shape is only
//! inspected once, at the serde boundary ([`RawMenuItem`]); everywhere else
//! the tree is the tagged [`MenuItem`] enum.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

const SEPARATOR: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawMenuItem", into = "RawMenuItem")]
pub enum MenuItem {
    Separator,
    Command(String),
    Submenu(Submenu),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submenu {
    pub title: String,
    pub items: Vec<MenuItem>,
}

/// Top level of the plugin menu.
///
/// When `is_root` is set the items are placed directly in Sketch's Plugins
/// menu and `title` is not written.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MenuRoot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub items: Vec<MenuItem>,
    #[serde(default, rename = "isRoot", skip_serializing_if = "is_false")]
    pub is_root: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawMenuItem {
    Text(String),
    Menu {
        title: String,
        #[serde(default)]
        items: Vec<RawMenuItem>,
    },
}

impl From<RawMenuItem> for MenuItem {
    fn from(raw: RawMenuItem) -> Self {
        match raw {
            RawMenuItem::Text(s) if s == SEPARATOR => MenuItem::Separator,
            RawMenuItem::Text(s) => MenuItem::Command(s),
            RawMenuItem::Menu { title, items } => MenuItem::Submenu(Submenu {
                title,
                items: items.into_iter().map(MenuItem::from).collect(),
            }),
        }
    }
}

impl From<MenuItem> for RawMenuItem {
    fn from(item: MenuItem) -> Self {
        match item {
            MenuItem::Separator => RawMenuItem::Text(SEPARATOR.to_string()),
            MenuItem::Command(id) => RawMenuItem::Text(id),
            MenuItem::Submenu(Submenu { title, items }) => RawMenuItem::Menu {
                title,
                items: items.into_iter().map(RawMenuItem::from).collect(),
            },
        }
    }
}

impl MenuRoot {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Every command identifier referenced anywhere in the tree, in order.
    pub fn referenced_identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_identifiers(&self.items, &mut out);
        out
    }

    /// Drop command items whose identifier is not in `known`. Submenus are
    /// kept even if they end up empty.
    pub fn retain_commands(&mut self, known: &BTreeSet<&str>) {
        retain_in(&mut self.items, known);
    }

    /// Drop every reference to `identifier`.
    pub fn remove_command(&mut self, identifier: &str) {
        remove_in(&mut self.items, identifier);
    }

    /// Point references to `old` at `new`.
    pub fn rename_command(&mut self, old: &str, new: &str) {
        rename_in(&mut self.items, old, new);
    }

    /// Indented text rendering, one line per item.
    pub fn render_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        render_into(&self.items, 0, &mut out);
        out
    }
}

fn collect_identifiers<'a>(items: &'a [MenuItem], out: &mut Vec<&'a str>) {
    for item in items {
        match item {
            MenuItem::Separator => {}
            MenuItem::Command(id) => out.push(id),
            MenuItem::Submenu(sub) => collect_identifiers(&sub.items, out),
        }
    }
}

fn retain_in(items: &mut Vec<MenuItem>, known: &BTreeSet<&str>) {
    items.retain(|item| match item {
        MenuItem::Command(id) => known.contains(id.as_str()),
        _ => true,
    });
    for item in items.iter_mut() {
        if let MenuItem::Submenu(sub) = item {
            retain_in(&mut sub.items, known);
        }
    }
}

fn remove_in(items: &mut Vec<MenuItem>, identifier: &str) {
    items.retain(|item| !matches!(item, MenuItem::Command(id) if id == identifier));
    for item in items.iter_mut() {
        if let MenuItem::Submenu(sub) = item {
            remove_in(&mut sub.items, identifier);
        }
    }
}

fn rename_in(items: &mut [MenuItem], old: &str, new: &str) {
    for item in items.iter_mut() {
        match item {
            MenuItem::Command(id) if id == old => *id = new.to_string(),
            MenuItem::Submenu(sub) => rename_in(&mut sub.items, old, new),
            _ => {}
        }
    }
}

fn render_into(items: &[MenuItem], depth: usize, out: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    for item in items {
        match item {
            MenuItem::Separator => out.push(format!("{indent}---")),
            MenuItem::Command(id) => out.push(format!("{indent}{id}")),
            MenuItem::Submenu(sub) => {
                out.push(format!("{indent}{}/", sub.title));
                render_into(&sub.items, depth + 1, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MenuRoot {
        serde_json::from_str(
            r#"{
                "title": "My Plugin",
                "items": ["hello", "-", { "title": "More", "items": ["bye", "gone"] }]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn parses_disk_shape_into_tagged_items() {
        let menu = sample();
        assert_eq!(menu.title.as_deref(), Some("My Plugin"));
        assert_eq!(menu.items[0], MenuItem::Command("hello".into()));
        assert_eq!(menu.items[1], MenuItem::Separator);
        match &menu.items[2] {
            MenuItem::Submenu(sub) => {
                assert_eq!(sub.title, "More");
                assert_eq!(sub.items.len(), 2);
            }
            other => panic!("expected submenu, got {:?}", other),
        }
    }

    #[test]
    fn writes_back_the_disk_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "title": "My Plugin",
                "items": ["hello", "-", { "title": "More", "items": ["bye", "gone"] }]
            })
        );
    }

    #[test]
    fn root_menu_omits_title() {
        let menu = MenuRoot {
            title: None,
            items: vec![MenuItem::Command("a".into())],
            is_root: true,
        };
        assert_eq!(
            serde_json::to_value(menu).unwrap(),
            serde_json::json!({ "items": ["a"], "isRoot": true })
        );
    }

    #[test]
    fn retain_prunes_unknown_commands_recursively() {
        let mut menu = sample();
        let known: BTreeSet<&str> = ["hello", "bye"].into_iter().collect();
        menu.retain_commands(&known);
        assert_eq!(menu.referenced_identifiers(), vec!["hello", "bye"]);
    }

    #[test]
    fn rename_and_remove() {
        let mut menu = sample();
        menu.rename_command("bye", "farewell");
        menu.remove_command("hello");
        assert_eq!(menu.referenced_identifiers(), vec!["farewell", "gone"]);
        assert_eq!(menu.items[0], MenuItem::Separator);
    }
}
