use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Loaded ahead of every other plugin whose requirements allow it.
pub const ADMIN_PLUGIN: &str = "admin";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOrder {
    /// Parents and dependencies always come before the plugins that need them.
    pub ordered: Vec<String>,
    /// `(plugin, missing requirement)`; the plugin cannot be loaded.
    pub unresolved: Vec<(String, String)>,
    /// Plugins on, or waiting behind, a dependency cycle.
    pub cyclic: Vec<String>,
}

/// Order plugins so requirements load first. `plugins` maps each canonical name to
/// the canonical names it requires. Ties are broken admin first, then by name.
pub fn resolve(plugins: &BTreeMap<String, Vec<String>>) -> LoadOrder {
    let mut order = LoadOrder::default();

    // Drop anything whose requirements are missing, transitively.
    let mut available: BTreeSet<&str> = plugins.keys().map(String::as_str).collect();
    loop {
        let missing: Vec<(&str, &str)> = available
            .iter()
            .filter_map(|name| {
                plugins[*name]
                    .iter()
                    .find(|req| !available.contains(req.as_str()))
                    .map(|req| (*name, req.as_str()))
            })
            .collect();

        if missing.is_empty() {
            break;
        }

        for (name, req) in missing {
            available.remove(name);
            order.unresolved.push((name.to_string(), req.to_string()));
        }
    }

    let mut pending: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for name in &available {
        let requirements: BTreeSet<&str> = plugins[*name].iter().map(String::as_str).collect();
        pending.insert(*name, requirements.len());
        for req in requirements {
            dependents.entry(req).or_default().push(*name);
        }
    }

    let mut ready: BTreeSet<(bool, &str)> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| (*name != ADMIN_PLUGIN, *name))
        .collect();

    while let Some((_, name)) = ready.pop_first() {
        order.ordered.push(name.to_string());
        pending.remove(name);

        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert((*dependent != ADMIN_PLUGIN, *dependent));
                }
            }
        }
    }

    order.cyclic = pending.keys().map(|name| name.to_string()).collect();
    order.cyclic.sort();
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `("child", "parent,other")`; an empty string means no requirements.
    fn graph(edges: &[(&str, &str)]) -> BTreeMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(name, reqs)| {
                let reqs: Vec<String> = reqs
                    .split(',')
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect();
                (name.to_string(), reqs)
            })
            .collect()
    }

    #[test]
    fn admin_loads_first_then_alphabetical() {
        let order = resolve(&graph(&[("search", ""), ("admin", ""), ("audit", "")]));
        assert_eq!(order.ordered, vec!["admin", "audit", "search"]);
        assert!(order.unresolved.is_empty());
        assert!(order.cyclic.is_empty());
    }

    #[test]
    fn parents_load_before_children() {
        let order = resolve(&graph(&[
            ("admin", "storage"),
            ("child", "parent"),
            ("parent", ""),
            ("storage", ""),
        ]));
        assert_eq!(order.ordered, vec!["parent", "child", "storage", "admin"]);
    }

    #[test]
    fn missing_requirement_excludes_dependents_transitively() {
        let order = resolve(&graph(&[
            ("a", "ghost"),
            ("b", "a"),
            ("c", ""),
        ]));
        assert_eq!(order.ordered, vec!["c"]);
        assert_eq!(
            order.unresolved,
            vec![
                ("a".to_string(), "ghost".to_string()),
                ("b".to_string(), "a".to_string()),
            ]
        );
    }

    #[test]
    fn cycles_are_reported_with_their_dependents() {
        let order = resolve(&graph(&[
            ("a", "b"),
            ("b", "a"),
            ("c", "a"),
            ("d", ""),
            ("self", "self"),
        ]));
        assert_eq!(order.ordered, vec!["d"]);
        assert_eq!(order.cyclic, vec!["a", "b", "c", "self"]);
    }

    #[test]
    fn duplicate_requirements_count_once() {
        let order = resolve(&graph(&[("child", "base,base"), ("base", "")]));
        assert_eq!(order.ordered, vec!["base", "child"]);
    }
}
