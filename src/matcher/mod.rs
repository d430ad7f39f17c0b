//! Resource Matcher
//!
//! Assigns Available elements to free job slots. Pure and synchronous: callers pass a
//! capacity snapshot and the matcher decrements it as it assigns, so repeated runs
//! against the same snapshot can never overcommit a site.
//!
//! A site is eligible for an element when all of these hold:
//! - the site has at least `Jobs` free slots,
//! - it is not blacklisted, and it is whitelisted (an empty whitelist allows any site),
//! - it holds every input block, unless the element trusts its site lists,
//! - with parent processing, it also holds every parent block.
//!
//! Team-scoped elements additionally require the caller to declare that team.

use crate::services::SiteCapacity;
use crate::store::types::Element;

/// Restrictions coming from the caller rather than from the element.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchConstraints<'a> {
    /// Teams of the acquiring queue. `None` skips the team check entirely.
    pub teams: Option<&'a [String]>,
    pub draining: bool,
    /// Only consider these requests.
    pub requests: Option<&'a [String]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub element: Element,
    pub site: String,
}

/// Matches `candidates` against `capacity`, highest priority first.
///
/// Elements that fit nowhere are skipped and stay Available for a later pass.
pub fn acquire(
    mut candidates: Vec<Element>,
    capacity: &mut SiteCapacity,
    constraints: &MatchConstraints<'_>,
) -> Vec<Assignment> {
    if constraints.draining {
        tracing::debug!("Draining: no work acquired");
        return Vec::new();
    }

    candidates.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.insert_time.cmp(&b.insert_time))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut assigned = Vec::new();
    for element in candidates {
        if capacity.values().all(|slots| *slots == 0) {
            break;
        }
        if !team_allows(&element, constraints) || !request_allows(&element, constraints) {
            continue;
        }

        let Some(site) = choose_site(&element, capacity) else {
            tracing::trace!("No eligible site for {} ({} jobs)", element.id, element.jobs);
            continue;
        };

        if let Some(slots) = capacity.get_mut(&site) {
            *slots -= element.jobs;
        }
        tracing::debug!("Matched {} ({} jobs) to {}", element.id, element.jobs, site);
        assigned.push(Assignment { element, site });
    }
    assigned
}

/// Sites that could run `element` right now, given `capacity`.
pub fn eligible_sites<'c>(element: &Element, capacity: &'c SiteCapacity) -> Vec<(&'c String, u64)> {
    let inputs = if element.trust_site_lists {
        None
    } else {
        element.input_locations()
    };
    let parents = if element.trust_site_lists {
        None
    } else {
        element.parent_locations()
    };

    capacity
        .iter()
        .filter(|(_, slots)| **slots > 0 && **slots >= element.jobs)
        .filter(|(site, _)| !element.site_blacklist.contains(site))
        .filter(|(site, _)| element.site_whitelist.is_empty() || element.site_whitelist.contains(site))
        .filter(|(site, _)| inputs.as_ref().is_none_or(|sites| sites.contains(*site)))
        .filter(|(site, _)| parents.as_ref().is_none_or(|sites| sites.contains(*site)))
        .map(|(site, slots)| (site, *slots))
        .collect()
}

/// Most free slots wins; ties go to the lexically smallest site name.
fn choose_site(element: &Element, capacity: &SiteCapacity) -> Option<String> {
    eligible_sites(element, capacity)
        .into_iter()
        .max_by(|(site_a, slots_a), (site_b, slots_b)| slots_a.cmp(slots_b).then_with(|| site_b.cmp(site_a)))
        .map(|(site, _)| site.clone())
}

fn team_allows(element: &Element, constraints: &MatchConstraints<'_>) -> bool {
    match (constraints.teams, &element.team) {
        (None, _) | (_, None) => true,
        (Some(teams), Some(team)) => teams.contains(team),
    }
}

fn request_allows(element: &Element, constraints: &MatchConstraints<'_>) -> bool {
    constraints
        .requests
        .is_none_or(|requests| requests.contains(&element.request_name))
}
