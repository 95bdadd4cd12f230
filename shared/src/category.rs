//! The three-level item category tree and fuzzy mapping of free-text
//! category names (as typed into an order sheet) onto it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;
use uuid::Uuid;

use crate::DomainError;

/// A candidate is accepted as the match only above this similarity.
pub const MATCH_THRESHOLD: f64 = 0.8;
pub const MAX_SUGGESTIONS: usize = 5;

const MAJOR_WEIGHT: f64 = 40.0;
const MIDDLE_WEIGHT: f64 = 35.0;
const MINOR_WEIGHT: f64 = 25.0;

string_enum! {
    #[derive(PartialOrd, Ord)]
    pub enum CategoryLevel {
        Major => "major",
        Middle => "middle",
        Minor => "minor",
    }
}

impl CategoryLevel {
    pub fn parent(&self) -> Option<CategoryLevel> {
        match self {
            CategoryLevel::Major => None,
            CategoryLevel::Middle => Some(CategoryLevel::Major),
            CategoryLevel::Minor => Some(CategoryLevel::Middle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub id: Uuid,
    pub level: CategoryLevel,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub display_order: i32,
}

/// Nested form returned by the tree endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryBranch {
    #[serde(flatten)]
    pub node: CategoryNode,
    pub children: Vec<CategoryBranch>,
}

/// Active categories, indexed for lookups by id and by parent.
#[derive(Debug, Clone, Default)]
pub struct CategoryTree {
    nodes: Vec<CategoryNode>,
    by_id: HashMap<Uuid, usize>,
}

impl CategoryTree {
    pub fn new(mut nodes: Vec<CategoryNode>) -> Self {
        nodes.sort_by(|a, b| {
            a.level
                .cmp(&b.level)
                .then(a.display_order.cmp(&b.display_order))
                .then_with(|| a.name.cmp(&b.name))
        });
        let by_id = nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
        Self { nodes, by_id }
    }

    pub fn get(&self, id: Uuid) -> Option<&CategoryNode> {
        self.by_id.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn by_level(&self, level: CategoryLevel) -> impl Iterator<Item = &CategoryNode> {
        self.nodes.iter().filter(move |n| n.level == level)
    }

    pub fn majors(&self) -> impl Iterator<Item = &CategoryNode> {
        self.by_level(CategoryLevel::Major)
    }

    pub fn children(&self, parent: Uuid) -> impl Iterator<Item = &CategoryNode> {
        self.nodes
            .iter()
            .filter(move |n| n.parent_id == Some(parent))
    }

    /// Names from the major down to `id`.
    pub fn path(&self, id: Uuid) -> Vec<&str> {
        let mut path = Vec::new();
        let mut cursor = self.get(id);
        while let Some(node) = cursor {
            path.push(node.name.as_str());
            cursor = node.parent_id.and_then(|p| self.get(p));
            if path.len() > 3 {
                break;
            }
        }
        path.reverse();
        path
    }

    pub fn nested(&self) -> Vec<CategoryBranch> {
        self.majors().map(|m| self.branch(m)).collect()
    }

    fn branch(&self, node: &CategoryNode) -> CategoryBranch {
        CategoryBranch {
            node: node.clone(),
            children: self.children(node.id).map(|c| self.branch(c)).collect(),
        }
    }

    /// Checks that a new node fits the hierarchy: majors have no parent,
    /// middles hang off a major and minors off a middle.
    pub fn check_parent(
        &self,
        level: CategoryLevel,
        parent_id: Option<Uuid>,
    ) -> Result<(), DomainError> {
        match (level.parent(), parent_id) {
            (None, None) => Ok(()),
            (None, Some(_)) => Err(DomainError::validation("a major category has no parent")),
            (Some(expected), None) => Err(DomainError::validation(format!(
                "a {} category needs a {} parent",
                level, expected
            ))),
            (Some(expected), Some(pid)) => match self.get(pid) {
                Some(parent) if parent.level == expected => Ok(()),
                Some(parent) => Err(DomainError::validation(format!(
                    "a {} category cannot hang off a {} category",
                    level, parent.level
                ))),
                None => Err(DomainError::validation(format!(
                    "parent category {} does not exist",
                    pid
                ))),
            },
        }
    }

    /// The node under `parent` (majors when `None`) already called `name`,
    /// ignoring `except`.
    pub fn sibling_named(&self, parent: Option<Uuid>, name: &str, except: Option<Uuid>) -> Option<&CategoryNode> {
        let wanted = name.trim();
        self.nodes.iter().find(|n| {
            n.parent_id == parent
                && Some(n.id) != except
                && n.name.trim().eq_ignore_ascii_case(wanted)
        })
    }

    /// Checks renaming or moving `id`. The node keeps its level, so a move
    /// must land under a parent of the level above.
    pub fn check_move(&self, id: Uuid, parent_id: Option<Uuid>) -> Result<&CategoryNode, DomainError> {
        let node = self
            .get(id)
            .ok_or_else(|| DomainError::validation(format!("category {} does not exist", id)))?;
        self.check_parent(node.level, parent_id)?;
        Ok(node)
    }

    /// Resolves caller-picked ids into names, verifying they form a chain.
    pub fn resolve(&self, picked: &CategoryResolution) -> Result<ResolvedCategory, DomainError> {
        let lookup = |id: Option<Uuid>, level: CategoryLevel| -> Result<Option<&CategoryNode>, DomainError> {
            let Some(id) = id else { return Ok(None) };
            match self.get(id) {
                Some(node) if node.level == level => Ok(Some(node)),
                Some(_) => Err(DomainError::validation(format!("{} is not a {} category", id, level))),
                None => Err(DomainError::validation(format!("category {} does not exist", id))),
            }
        };
        let major = lookup(picked.major_id, CategoryLevel::Major)?;
        let middle = lookup(picked.middle_id, CategoryLevel::Middle)?;
        let minor = lookup(picked.minor_id, CategoryLevel::Minor)?;

        if let (Some(mj), Some(md)) = (major, middle) {
            if md.parent_id != Some(mj.id) {
                return Err(DomainError::validation(format!(
                    "'{}' does not belong to '{}'",
                    md.name, mj.name
                )));
            }
        }
        if let (Some(md), Some(mn)) = (middle, minor) {
            if mn.parent_id != Some(md.id) {
                return Err(DomainError::validation(format!(
                    "'{}' does not belong to '{}'",
                    mn.name, md.name
                )));
            }
        }

        Ok(ResolvedCategory {
            major: major.map(|n| n.name.clone()),
            middle: middle.map(|n| n.name.clone()),
            minor: minor.map(|n| n.name.clone()),
        })
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Normalized Levenshtein similarity of the lowercased, trimmed inputs, in
/// `0.0..=1.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&normalize(a), &normalize(b))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryMappingRequest {
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub middle: Option<String>,
    #[serde(default)]
    pub minor: Option<String>,
}

impl CategoryMappingRequest {
    fn level(&self, level: CategoryLevel) -> Option<&str> {
        let value = match level {
            CategoryLevel::Major => &self.major,
            CategoryLevel::Middle => &self.middle,
            CategoryLevel::Minor => &self.minor,
        };
        value.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

string_enum! {
    pub enum MappingStatus {
        ExactMatch => "exact_match",
        PartialMatch => "partial_match",
        NoMatch => "no_match",
        InvalidHierarchy => "invalid_hierarchy",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySuggestion {
    pub id: Uuid,
    pub name: String,
    pub level: CategoryLevel,
    /// Percent, rounded.
    pub similarity: u8,
    pub parent_id: Option<Uuid>,
    pub parent_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedCategory {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryMappingResult {
    pub request: CategoryMappingRequest,
    pub major: Option<MatchedCategory>,
    pub middle: Option<MatchedCategory>,
    pub minor: Option<MatchedCategory>,
    pub status: MappingStatus,
    pub suggestions: Vec<CategorySuggestion>,
    /// 0-100.
    pub confidence: u8,
}

struct LevelMatch<'t> {
    best: Option<&'t CategoryNode>,
    suggestions: Vec<CategorySuggestion>,
}

impl LevelMatch<'_> {
    fn top_similarity(&self) -> f64 {
        self.suggestions
            .first()
            .map(|s| f64::from(s.similarity))
            .unwrap_or(0.0)
    }
}

fn best_match<'t>(
    tree: &'t CategoryTree,
    wanted: &str,
    candidates: impl Iterator<Item = &'t CategoryNode>,
) -> LevelMatch<'t> {
    let mut best: Option<(&CategoryNode, f64)> = None;
    let mut scored: Vec<(f64, CategorySuggestion)> = Vec::new();

    for node in candidates {
        let score = similarity(wanted, &node.name);
        if score > MATCH_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
            best = Some((node, score));
        }
        scored.push((
            score,
            CategorySuggestion {
                id: node.id,
                name: node.name.clone(),
                level: node.level,
                similarity: (score * 100.0).round() as u8,
                parent_id: node.parent_id,
                parent_name: node
                    .parent_id
                    .and_then(|p| tree.get(p))
                    .map(|p| p.name.clone()),
            },
        ));
    }

    scored.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| a.1.name.cmp(&b.1.name))
            .then_with(|| a.1.id.cmp(&b.1.id))
    });
    LevelMatch {
        best: best.map(|(n, _)| n),
        suggestions: scored
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, s)| s)
            .collect(),
    }
}

fn matched(node: &CategoryNode) -> MatchedCategory {
    MatchedCategory {
        id: node.id,
        name: node.name.clone(),
    }
}

/// Maps the three free-text names onto the tree.
///
/// Each level is searched among the children of the level above when that
/// level matched, otherwise among every node of the level. A level searched
/// without its parent contributes suggestions but is never reported as
/// matched.
pub fn validate_mapping(tree: &CategoryTree, request: &CategoryMappingRequest) -> CategoryMappingResult {
    let mut suggestions = Vec::new();

    let major = request.level(CategoryLevel::Major).map(|name| {
        best_match(tree, name, tree.by_level(CategoryLevel::Major))
    });
    let major_node = major.as_ref().and_then(|m| m.best);

    let middle = request.level(CategoryLevel::Middle).map(|name| match major_node {
        Some(parent) => best_match(tree, name, tree.children(parent.id)),
        None => best_match(tree, name, tree.by_level(CategoryLevel::Middle)),
    });
    let middle_node = middle.as_ref().and_then(|m| m.best);
    let middle_matched = middle_node.filter(|_| major_node.is_some());

    let minor = request.level(CategoryLevel::Minor).map(|name| match middle_node {
        Some(parent) => best_match(tree, name, tree.children(parent.id)),
        None => best_match(tree, name, tree.by_level(CategoryLevel::Minor)),
    });
    let minor_matched = minor
        .as_ref()
        .and_then(|m| m.best)
        .filter(|_| middle_matched.is_some());

    let mut total = 0.0;
    let mut score = 0.0;
    for (level, weight, matched_here) in [
        (&major, MAJOR_WEIGHT, major_node.is_some()),
        (&middle, MIDDLE_WEIGHT, middle_matched.is_some()),
        (&minor, MINOR_WEIGHT, minor_matched.is_some()),
    ] {
        if let Some(level) = level {
            total += weight;
            if matched_here {
                score += weight * level.top_similarity() / 100.0;
            }
        }
    }
    let confidence = if total == 0.0 {
        0
    } else {
        ((score / total) * 100.0).round() as u8
    };

    let all_matched = request.level(CategoryLevel::Major).is_some()
        && major_node.is_some()
        && (request.level(CategoryLevel::Middle).is_none() || middle_matched.is_some())
        && (request.level(CategoryLevel::Minor).is_none() || minor_matched.is_some());
    let any_matched = major_node.is_some() || middle_matched.is_some() || minor_matched.is_some();

    let status = if all_matched {
        MappingStatus::ExactMatch
    } else if names_exist_out_of_chain(tree, request) {
        MappingStatus::InvalidHierarchy
    } else if any_matched {
        MappingStatus::PartialMatch
    } else {
        MappingStatus::NoMatch
    };

    for level in [major, middle, minor].into_iter().flatten() {
        suggestions.extend(level.suggestions);
    }

    CategoryMappingResult {
        request: request.clone(),
        major: major_node.map(matched),
        middle: middle_matched.map(matched),
        minor: minor_matched.map(matched),
        status,
        suggestions,
        confidence,
    }
}

/// True when every supplied name exists verbatim at its level but the names
/// never form a parent/child chain.
fn names_exist_out_of_chain(tree: &CategoryTree, request: &CategoryMappingRequest) -> bool {
    let named = |level: CategoryLevel| -> Option<Vec<&CategoryNode>> {
        let wanted = request.level(level)?.to_lowercase();
        Some(
            tree.by_level(level)
                .filter(|n| n.name.trim().to_lowercase() == wanted)
                .collect(),
        )
    };
    let levels: Vec<Vec<&CategoryNode>> = [CategoryLevel::Major, CategoryLevel::Middle, CategoryLevel::Minor]
        .into_iter()
        .filter_map(named)
        .collect();
    if levels.len() < 2 || levels.iter().any(Vec::is_empty) {
        return false;
    }

    let chained = |upper: &[&CategoryNode], lower: &[&CategoryNode]| {
        lower
            .iter()
            .any(|l| upper.iter().any(|u| l.parent_id == Some(u.id)))
    };
    !levels.windows(2).all(|w| {
        // A gap in the supplied levels (major + minor) is checked through the
        // middle parent.
        if w[0][0].level == CategoryLevel::Major && w[1][0].level == CategoryLevel::Minor {
            w[1].iter().any(|minor| {
                minor
                    .parent_id
                    .and_then(|p| tree.get(p))
                    .is_some_and(|middle| w[0].iter().any(|m| middle.parent_id == Some(m.id)))
            })
        } else {
            chained(&w[0], &w[1])
        }
    })
}

pub fn validate_batch(
    tree: &CategoryTree,
    requests: &[CategoryMappingRequest],
) -> Vec<CategoryMappingResult> {
    requests.iter().map(|r| validate_mapping(tree, r)).collect()
}

/// Category ids a user picked for a row after reviewing suggestions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryResolution {
    #[serde(default)]
    pub major_id: Option<Uuid>,
    #[serde(default)]
    pub middle_id: Option<Uuid>,
    #[serde(default)]
    pub minor_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedCategory {
    pub major: Option<String>,
    pub middle: Option<String>,
    pub minor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(level: CategoryLevel, name: &str, parent: Option<&CategoryNode>) -> CategoryNode {
        CategoryNode {
            id: Uuid::new_v4(),
            level,
            name: name.to_string(),
            parent_id: parent.map(|p| p.id),
            display_order: 0,
        }
    }

    struct Fixture {
        tree: CategoryTree,
        steel: CategoryNode,
        rebar: CategoryNode,
        d10: CategoryNode,
        elec: CategoryNode,
        cable: CategoryNode,
    }

    fn fixture() -> Fixture {
        let steel = node(CategoryLevel::Major, "철강재", None);
        let elec = node(CategoryLevel::Major, "전기자재", None);
        let rebar = node(CategoryLevel::Middle, "철근", Some(&steel));
        let cable = node(CategoryLevel::Middle, "전선", Some(&elec));
        let d10 = node(CategoryLevel::Minor, "D10", Some(&rebar));
        let tree = CategoryTree::new(vec![
            steel.clone(),
            elec.clone(),
            rebar.clone(),
            cable.clone(),
            d10.clone(),
        ]);
        Fixture {
            tree,
            steel,
            rebar,
            d10,
            elec,
            cable,
        }
    }

    fn request(major: Option<&str>, middle: Option<&str>, minor: Option<&str>) -> CategoryMappingRequest {
        CategoryMappingRequest {
            major: major.map(String::from),
            middle: middle.map(String::from),
            minor: minor.map(String::from),
        }
    }

    #[test]
    fn similarity_is_normalized_levenshtein() {
        assert_eq!(similarity("Rebar", " rebar "), 1.0);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert!((similarity("kitten", "sitting") - (1.0 - 3.0 / 7.0)).abs() < 1e-9);
        assert!((similarity("철근", "철근콘") - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn full_chain_is_exact_match() {
        let f = fixture();
        let result = validate_mapping(&f.tree, &request(Some("철강재"), Some("철근"), Some("d10")));
        assert_eq!(result.status, MappingStatus::ExactMatch);
        assert_eq!(result.confidence, 100);
        assert_eq!(result.minor.unwrap().id, f.d10.id);
        assert_eq!(result.middle.unwrap().id, f.rebar.id);
    }

    #[test]
    fn unmatched_minor_is_partial() {
        let f = fixture();
        let result = validate_mapping(&f.tree, &request(Some("철강재"), Some("철근"), Some("H빔")));
        assert_eq!(result.status, MappingStatus::PartialMatch);
        assert!(result.minor.is_none());
        // 40 + 35 of 100.
        assert_eq!(result.confidence, 75);
    }

    #[test]
    fn nothing_close_is_no_match() {
        let f = fixture();
        let result = validate_mapping(&f.tree, &request(Some("목재"), None, None));
        assert_eq!(result.status, MappingStatus::NoMatch);
        assert_eq!(result.confidence, 0);
        assert!(result.suggestions.len() <= MAX_SUGGESTIONS);
        assert_eq!(result.suggestions.len(), 2);
    }

    #[test]
    fn names_from_different_branches_are_invalid_hierarchy() {
        let f = fixture();
        let result = validate_mapping(&f.tree, &request(Some("전기자재"), Some("철근"), None));
        assert_eq!(result.status, MappingStatus::InvalidHierarchy);
        assert_eq!(result.major.unwrap().id, f.elec.id);
        assert!(result.middle.is_none());
    }

    #[test]
    fn batch_flags_out_of_chain_rows() {
        let f = fixture();
        let results = validate_batch(
            &f.tree,
            &[
                request(Some("전기자재"), Some("철근"), None),
                request(Some("철강재"), Some("철근"), Some("D10")),
                request(Some("전기자재"), None, Some("d10")),
            ],
        );
        let statuses: Vec<MappingStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                MappingStatus::InvalidHierarchy,
                MappingStatus::ExactMatch,
                MappingStatus::InvalidHierarchy,
            ]
        );
        assert_eq!(results[0].request.major.as_deref(), Some("전기자재"));
    }

    #[test]
    fn tied_suggestions_are_ordered_by_name() {
        let mut later = node(CategoryLevel::Major, "AB1", None);
        later.display_order = 0;
        let mut earlier = node(CategoryLevel::Major, "AA1", None);
        earlier.display_order = 1;
        let tree = CategoryTree::new(vec![later.clone(), earlier.clone()]);

        let first = validate_mapping(&tree, &request(Some("A"), None, None));
        let names: Vec<&str> = first.suggestions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["AA1", "AB1"]);
        assert_eq!(first.suggestions[0].similarity, first.suggestions[1].similarity);

        let reversed = CategoryTree::new(vec![earlier, later]);
        let second = validate_mapping(&reversed, &request(Some("A"), None, None));
        assert_eq!(first.suggestions, second.suggestions);
    }

    #[test]
    fn middle_without_major_only_suggests() {
        let f = fixture();
        let result = validate_mapping(&f.tree, &request(None, Some("전선"), None));
        assert_eq!(result.status, MappingStatus::NoMatch);
        assert_eq!(result.suggestions[0].id, f.cable.id);
        assert_eq!(result.suggestions[0].parent_name.as_deref(), Some("전기자재"));
    }

    #[test]
    fn path_and_nested_tree() {
        let f = fixture();
        assert_eq!(f.tree.path(f.d10.id), vec!["철강재", "철근", "D10"]);
        let nested = f.tree.nested();
        assert_eq!(nested.len(), 2);
        let steel = nested.iter().find(|b| b.node.id == f.steel.id).unwrap();
        assert_eq!(steel.children[0].children[0].node.name, "D10");
    }

    #[test]
    fn resolution_checks_the_chain() {
        let f = fixture();
        let ok = f
            .tree
            .resolve(&CategoryResolution {
                major_id: Some(f.steel.id),
                middle_id: Some(f.rebar.id),
                minor_id: Some(f.d10.id),
            })
            .unwrap();
        assert_eq!(ok.minor.as_deref(), Some("D10"));

        let err = f.tree.resolve(&CategoryResolution {
            major_id: Some(f.elec.id),
            middle_id: Some(f.rebar.id),
            minor_id: None,
        });
        assert!(err.is_err());
    }

    #[test]
    fn moves_keep_the_level_and_names_stay_unique() {
        let f = fixture();
        let moved = f.tree.check_move(f.cable.id, Some(f.steel.id)).unwrap();
        assert_eq!(moved.level, CategoryLevel::Middle);
        assert!(f.tree.check_move(f.d10.id, Some(f.steel.id)).is_err());
        assert!(f.tree.check_move(f.steel.id, Some(f.elec.id)).is_err());
        assert!(f.tree.check_move(Uuid::new_v4(), None).is_err());

        assert_eq!(
            f.tree.sibling_named(Some(f.steel.id), " 철근 ", None).map(|n| n.id),
            Some(f.rebar.id)
        );
        assert!(f.tree.sibling_named(Some(f.steel.id), "철근", Some(f.rebar.id)).is_none());
        assert!(f.tree.sibling_named(Some(f.elec.id), "철근", None).is_none());
    }

    #[test]
    fn parent_levels_are_enforced() {
        let f = fixture();
        assert!(f.tree.check_parent(CategoryLevel::Major, None).is_ok());
        assert!(f.tree.check_parent(CategoryLevel::Middle, Some(f.steel.id)).is_ok());
        assert!(f.tree.check_parent(CategoryLevel::Minor, Some(f.steel.id)).is_err());
        assert!(f.tree.check_parent(CategoryLevel::Middle, None).is_err());
    }
}
