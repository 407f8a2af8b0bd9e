use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    #[serde(rename = "_id")]
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub description: Option<String>,
    pub parent_department_id: Option<String>,
    pub manager_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Department hierarchy node returned by the tree endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DepartmentNode {
    pub id: String,
    pub name: String,
    pub parent_department_id: Option<String>,
    pub manager_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DepartmentNode>,
}

/// Builds the forest of departments. A department whose parent is missing from the
/// input becomes a root. Each department is placed at most once, so a corrupted
/// parent chain cannot recurse forever; members of a pure cycle are promoted to roots.
pub fn build_department_tree(departments: &[Department]) -> Vec<DepartmentNode> {
    let known: HashSet<&str> = departments.iter().map(|d| d.id.as_str()).collect();
    let mut children_of: HashMap<&str, Vec<&Department>> = HashMap::new();
    let mut roots: Vec<&Department> = Vec::new();

    for dept in departments {
        match dept.parent_department_id.as_deref() {
            Some(parent) if known.contains(parent) && parent != dept.id => {
                children_of.entry(parent).or_default().push(dept)
            }
            _ => roots.push(dept),
        }
    }

    let mut placed: HashSet<&str> = HashSet::new();
    roots.sort_by(|a, b| a.name.cmp(&b.name));
    let mut forest: Vec<DepartmentNode> = roots
        .into_iter()
        .filter_map(|d| build_node(d, &children_of, &mut placed))
        .collect();

    // Whatever was not reached from a root sits on a cycle.
    let mut orphans: Vec<&Department> = departments
        .iter()
        .filter(|d| !placed.contains(d.id.as_str()))
        .collect();
    orphans.sort_by(|a, b| a.name.cmp(&b.name));
    for dept in orphans {
        if let Some(node) = build_node(dept, &children_of, &mut placed) {
            forest.push(node);
        }
    }
    forest
}

fn build_node<'a>(
    dept: &'a Department,
    children_of: &HashMap<&'a str, Vec<&'a Department>>,
    placed: &mut HashSet<&'a str>,
) -> Option<DepartmentNode> {
    if !placed.insert(dept.id.as_str()) {
        return None;
    }
    let mut kids: Vec<&Department> = children_of
        .get(dept.id.as_str())
        .cloned()
        .unwrap_or_default();
    kids.sort_by(|a, b| a.name.cmp(&b.name));
    let children = kids
        .into_iter()
        .filter_map(|child| build_node(child, children_of, placed))
        .collect();
    Some(DepartmentNode {
        id: dept.id.clone(),
        name: dept.name.clone(),
        parent_department_id: dept.parent_department_id.clone(),
        manager_id: dept.manager_id.clone(),
        children,
    })
}

/// Returns true when re-parenting `id` under `new_parent` would make it its own ancestor.
pub fn creates_cycle(departments: &[Department], id: &str, new_parent: &str) -> bool {
    let parents: HashMap<&str, Option<&str>> = departments
        .iter()
        .map(|d| (d.id.as_str(), d.parent_department_id.as_deref()))
        .collect();
    let mut seen = HashSet::new();
    let mut cursor = Some(new_parent);
    while let Some(current) = cursor {
        if current == id {
            return true;
        }
        if !seen.insert(current) {
            return false;
        }
        cursor = parents.get(current).copied().flatten();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dept(id: &str, name: &str, parent: Option<&str>) -> Department {
        let now = Utc::now();
        Department {
            id: id.into(),
            company_id: "c1".into(),
            name: name.into(),
            description: None,
            parent_department_id: parent.map(String::from),
            manager_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn nests_children_under_parents_sorted_by_name() {
        let depts = vec![
            dept("eng", "Engineering", None),
            dept("web", "Web", Some("eng")),
            dept("api", "API", Some("eng")),
            dept("hr", "Human Resources", None),
        ];
        let tree = build_department_tree(&depts);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].id, "eng");
        let kids: Vec<&str> = tree[0].children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(kids, vec!["API", "Web"]);
        assert!(tree[1].children.is_empty());
    }

    #[test]
    fn missing_parent_becomes_root() {
        let depts = vec![dept("ops", "Ops", Some("gone"))];
        let tree = build_department_tree(&depts);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, "ops");
    }

    #[test]
    fn cycles_do_not_loop_and_every_department_appears_once() {
        let depts = vec![dept("a", "A", Some("b")), dept("b", "B", Some("a"))];
        let tree = build_department_tree(&depts);
        fn count(nodes: &[DepartmentNode]) -> usize {
            nodes.iter().map(|n| 1 + count(&n.children)).sum()
        }
        assert_eq!(count(&tree), 2);
    }

    #[test]
    fn detects_reparenting_under_descendant() {
        let depts = vec![
            dept("root", "Root", None),
            dept("mid", "Mid", Some("root")),
            dept("leaf", "Leaf", Some("mid")),
        ];
        assert!(creates_cycle(&depts, "root", "leaf"));
        assert!(creates_cycle(&depts, "mid", "mid"));
        assert!(!creates_cycle(&depts, "leaf", "root"));
    }
}
