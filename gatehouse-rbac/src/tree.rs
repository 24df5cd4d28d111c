//! In-memory adjacency index over the menu table
//!
//! Rebuilt from a fresh snapshot on every read; nothing here is cached.

use std::collections::{HashMap, HashSet, VecDeque};

use gatehouse_storage::entities::Menu;

use crate::error::{RbacError, RbacResult};
use crate::models::{CapabilityFlags, MenuNode, MenuStatistics};

pub struct MenuIndex {
    menus: HashMap<i32, Menu>,
    /// Child ids per parent, sorted by `order_index` then id. Menus whose
    /// parent is missing are filed under `None`.
    children: HashMap<Option<i32>, Vec<i32>>,
}

impl MenuIndex {
    pub fn new(menus: impl IntoIterator<Item = Menu>) -> Self {
        let menus: HashMap<i32, Menu> = menus.into_iter().map(|m| (m.id, m)).collect();
        let mut index = Self {
            menus,
            children: HashMap::new(),
        };
        index.rebuild_children();
        index
    }

    fn rebuild_children(&mut self) {
        let mut children: HashMap<Option<i32>, Vec<i32>> = HashMap::new();
        for menu in self.menus.values() {
            let parent = menu.parent_id.filter(|p| self.menus.contains_key(p));
            children.entry(parent).or_default().push(menu.id);
        }

        for ids in children.values_mut() {
            ids.sort_by_key(|id| {
                let menu = &self.menus[id];
                (menu.order_index, menu.id)
            });
        }

        self.children = children;
    }

    pub fn len(&self) -> usize {
        self.menus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.menus.is_empty()
    }

    pub fn get(&self, id: i32) -> Option<&Menu> {
        self.menus.get(&id)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.menus.contains_key(&id)
    }

    /// Ordered children of `parent`; `None` yields the roots
    pub fn children_of(&self, parent: Option<i32>) -> &[i32] {
        self.children.get(&parent).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every descendant of `id` in breadth-first order, excluding `id`
    pub fn descendants(&self, id: i32) -> Vec<i32> {
        let mut visited = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        let mut found = Vec::new();

        while let Some(current) = queue.pop_front() {
            for &child in self.children_of(Some(current)) {
                if visited.insert(child) {
                    found.push(child);
                    queue.push_back(child);
                }
            }
        }

        found
    }

    /// `id` followed by its descendants
    pub fn with_descendants(&self, id: i32) -> Vec<i32> {
        let mut ids = vec![id];
        ids.extend(self.descendants(id));
        ids
    }

    /// Reject placing `menu_id` under `new_parent` when the parent is the menu
    /// itself or one of its descendants
    pub fn check_move(&self, menu_id: i32, new_parent: Option<i32>) -> RbacResult<()> {
        if !self.contains(menu_id) {
            return Err(RbacError::MenuNotFound { menu_id });
        }

        let Some(parent_id) = new_parent else {
            return Ok(());
        };

        if !self.contains(parent_id) {
            return Err(RbacError::MenuNotFound { menu_id: parent_id });
        }

        if parent_id == menu_id || self.descendants(menu_id).contains(&parent_id) {
            return Err(RbacError::CircularMenuReference { menu_id, parent_id });
        }

        Ok(())
    }

    /// Next free `order_index` at the end of `parent`'s children
    pub fn next_order_index(&self, parent: Option<i32>, excluding: Option<i32>) -> i32 {
        self.children_of(parent)
            .iter()
            .filter(|&&id| Some(id) != excluding)
            .filter_map(|id| self.menus.get(id))
            .map(|m| m.order_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Menus in tree pre-order with their zero-based depth
    pub fn preorder(&self) -> Vec<(i32, usize)> {
        let mut out = Vec::with_capacity(self.menus.len());
        let mut visited = HashSet::new();
        let mut stack: Vec<(i32, usize)> = self
            .children_of(None)
            .iter()
            .rev()
            .map(|&id| (id, 0))
            .collect();

        while let Some((id, depth)) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            out.push((id, depth));
            for &child in self.children_of(Some(id)).iter().rev() {
                stack.push((child, depth + 1));
            }
        }

        out
    }

    /// Assemble the forest restricted to `members`.
    ///
    /// With `promote_orphans`, a member whose parent is not a member becomes a
    /// top-level node; otherwise it is dropped together with its subtree,
    /// so only members with an unbroken member path to a root appear.
    pub fn build_forest(
        &self,
        members: &HashSet<i32>,
        promote_orphans: bool,
        flags: &HashMap<i32, CapabilityFlags>,
    ) -> Vec<MenuNode> {
        let mut tops: Vec<&Menu> = self
            .menus
            .values()
            .filter(|m| members.contains(&m.id))
            .filter(|m| match m.parent_id.filter(|p| self.menus.contains_key(p)) {
                None => true,
                Some(parent) => promote_orphans && !members.contains(&parent),
            })
            .collect();
        tops.sort_by_key(|m| (m.order_index, m.id));

        let mut visited = HashSet::new();
        tops.into_iter()
            .filter_map(|m| self.build_node(m.id, members, flags, &mut visited))
            .collect()
    }

    fn build_node(
        &self,
        id: i32,
        members: &HashSet<i32>,
        flags: &HashMap<i32, CapabilityFlags>,
        visited: &mut HashSet<i32>,
    ) -> Option<MenuNode> {
        if !visited.insert(id) {
            return None;
        }
        let menu = self.menus.get(&id)?;

        let children = self
            .children_of(Some(id))
            .iter()
            .filter(|child| members.contains(child))
            .filter_map(|&child| self.build_node(child, members, flags, visited))
            .collect();

        Some(MenuNode {
            id: menu.id,
            parent_id: menu.parent_id,
            title: menu.title.clone(),
            path: menu.path.clone(),
            icon: menu.icon.clone(),
            order_index: menu.order_index,
            is_active: menu.is_active,
            permissions: flags.get(&id).copied(),
            children,
        })
    }

    pub fn statistics(&self) -> MenuStatistics {
        let total = self.menus.len();
        let active = self.menus.values().filter(|m| m.is_active).count();
        let root_count = self.children_of(None).len();
        let leaf_count = self
            .menus
            .keys()
            .filter(|&&id| self.children_of(Some(id)).is_empty())
            .count();

        let max_depth = self
            .preorder()
            .into_iter()
            .map(|(_, depth)| depth + 1)
            .max()
            .unwrap_or(0);

        let parents: Vec<usize> = self
            .menus
            .keys()
            .map(|&id| self.children_of(Some(id)).len())
            .filter(|&n| n > 0)
            .collect();
        let average_branching_factor = if parents.is_empty() {
            0.0
        } else {
            parents.iter().sum::<usize>() as f64 / parents.len() as f64
        };

        MenuStatistics {
            total,
            active,
            inactive: total - active,
            root_count,
            leaf_count,
            max_depth,
            average_branching_factor,
        }
    }

    #[cfg(test)]
    fn apply_move(&mut self, menu_id: i32, new_parent: Option<i32>) -> RbacResult<()> {
        self.check_move(menu_id, new_parent)?;
        if let Some(menu) = self.menus.get_mut(&menu_id) {
            menu.parent_id = new_parent;
        }
        self.rebuild_children();
        Ok(())
    }

    #[cfg(test)]
    fn has_cycle(&self) -> bool {
        self.menus.values().any(|start| {
            let mut seen = HashSet::from([start.id]);
            let mut current = start.parent_id;
            while let Some(id) = current {
                if !seen.insert(id) {
                    return true;
                }
                current = self.menus.get(&id).and_then(|m| m.parent_id);
            }
            false
        })
    }
}
