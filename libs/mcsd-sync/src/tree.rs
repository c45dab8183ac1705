//! Authoritative organization tree.
//!
//! Built per sync from the source's current organization set: every
//! URA-bearing organization is a root, and its members are the organizations
//! whose `partOf` chain terminates at it. Stored as an index arena, so the
//! chain walk needs no shared pointers.

use std::collections::{HashMap, HashSet};

use fhir_client::models::{reference_id, BundleEntry, Organization};

use crate::coding;

/// `partOf` chains longer than this are treated as not linked.
const MAX_PART_OF_DEPTH: usize = 10;

#[derive(Debug)]
pub struct TreeRoot {
    /// Arena index of the root organization.
    pub org: usize,
    /// Arena indices of organizations whose `partOf` chain reaches the root.
    pub members: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct OrganizationTree {
    orgs: Vec<Organization>,
    by_id: HashMap<String, usize>,
    roots: Vec<TreeRoot>,
}

impl OrganizationTree {
    /// Build the tree from bundle entries; non-Organization entries and
    /// organizations without an id are ignored.
    pub fn build(entries: &[BundleEntry]) -> Self {
        let mut orgs: Vec<Organization> = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for entry in entries {
            let Some(resource) = &entry.resource else {
                continue;
            };
            if resource.get("resourceType").and_then(|v| v.as_str()) != Some("Organization") {
                continue;
            }
            let Ok(org) = serde_json::from_value::<Organization>(resource.clone()) else {
                continue;
            };
            let Some(id) = org.id.clone() else {
                continue;
            };
            if by_id.contains_key(&id) {
                continue;
            }
            by_id.insert(id, orgs.len());
            orgs.push(org);
        }

        let mut tree = OrganizationTree {
            orgs,
            by_id,
            roots: Vec::new(),
        };

        for root_index in 0..tree.orgs.len() {
            if coding::ura_identifiers(&tree.orgs[root_index].identifier).is_empty() {
                continue;
            }
            let members = (0..tree.orgs.len())
                .filter(|&index| index != root_index && tree.links_to(index, root_index))
                .collect();
            tree.roots.push(TreeRoot {
                org: root_index,
                members,
            });
        }

        tree
    }

    /// Retain only the root whose URA matches; members stay resolvable
    /// because the arena is untouched.
    pub fn filter_by_ura(mut self, authoritative_ura: &str) -> Self {
        self.roots.retain(|root| {
            coding::ura_identifiers(&self.orgs[root.org].identifier)
                .iter()
                .any(|id| id.value.as_deref() == Some(authoritative_ura))
        });
        self
    }

    /// Walk `from`'s `partOf` chain and check whether it reaches `to`.
    /// Cycles and chains deeper than [`MAX_PART_OF_DEPTH`] count as not
    /// linked.
    fn links_to(&self, from: usize, to: usize) -> bool {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut current = from;
        for _ in 0..=MAX_PART_OF_DEPTH {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                return false;
            }
            let Some(parent_ref) = self.orgs[current]
                .part_of
                .as_ref()
                .and_then(|r| r.reference.as_deref())
            else {
                return false;
            };
            match self.by_id.get(reference_id(parent_ref)) {
                Some(&parent) => current = parent,
                None => return false,
            }
        }
        false
    }

    /// True when a `partOf` chain starting at the organization with
    /// `start_id` terminates at one of the tree's roots. The start may
    /// itself be a root.
    pub fn chain_terminates_at_root(&self, start_id: &str) -> bool {
        let Some(&start) = self.by_id.get(start_id) else {
            return false;
        };
        self.roots.iter().any(|root| self.links_to(start, root.org))
    }

    /// True when the id belongs to a root or a member of a root.
    pub fn is_accepted_org_id(&self, id: &str) -> bool {
        let Some(&index) = self.by_id.get(id) else {
            return false;
        };
        self.roots
            .iter()
            .any(|root| root.org == index || root.members.contains(&index))
    }

    /// True when any root carries the given URA value.
    pub fn has_root_with_ura(&self, ura: &str) -> bool {
        self.roots.iter().any(|root| {
            coding::ura_identifiers(&self.orgs[root.org].identifier)
                .iter()
                .any(|id| id.value.as_deref() == Some(ura))
        })
    }

    /// Roots with their member organizations.
    pub fn roots(&self) -> impl Iterator<Item = (&Organization, Vec<&Organization>)> {
        self.roots.iter().map(|root| {
            let members = root.members.iter().map(|&m| &self.orgs[m]).collect();
            (&self.orgs[root.org], members)
        })
    }

    /// Roots and members, flattened.
    pub fn accepted_organizations(&self) -> impl Iterator<Item = &Organization> {
        self.roots.iter().flat_map(|root| {
            std::iter::once(&self.orgs[root.org])
                .chain(root.members.iter().map(|&m| &self.orgs[m]))
        })
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }
}
