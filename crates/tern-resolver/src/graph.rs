//! Dependency graph of a solution on one target environment.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use tern_core::environment::TargetEnvironment;
use tern_core::name::{ExtraName, PackageName};
use tern_core::requirement::{RequirementRoot, RootSelection};
use tern_core::solution::{Solution, SolutionError};
use tern_core::version::Version;

/// A node in the graph: the project itself or one locked package.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum GraphNode {
    Project,
    Package { name: PackageName, version: Version },
}

impl GraphNode {
    pub fn name(&self) -> Option<&PackageName> {
        match self {
            GraphNode::Project => None,
            GraphNode::Package { name, .. } => Some(name),
        }
    }
}

/// Edge label: which root declared it (edges out of the project only) and
/// the extras it enables.
#[derive(Debug, Clone, Default)]
pub struct DepEdge {
    pub root: Option<RequirementRoot>,
    pub extras: Vec<ExtraName>,
}

/// Installable packages for one environment, backed by petgraph.
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, DepEdge>,
    index: HashMap<PackageName, NodeIndex>,
    pub root: NodeIndex,
}

impl DependencyGraph {
    /// Build the graph of what `selection` installs on `env`, following only
    /// edges whose markers hold there.
    pub fn for_environment(
        solution: &Solution,
        env: &TargetEnvironment,
        selection: &RootSelection,
    ) -> Result<Self, SolutionError> {
        let selected = solution.selected_for(env)?;
        let mut graph = DiGraph::new();
        let root = graph.add_node(GraphNode::Project);
        let mut this = Self {
            graph,
            index: HashMap::new(),
            root,
        };

        let mut enabled: BTreeMap<PackageName, BTreeSet<ExtraName>> = BTreeMap::new();
        let mut queue = VecDeque::new();
        for (origin, deps) in solution.roots.iter().filter(|(r, _)| selection.includes(r)) {
            for dep in deps.iter().filter(|d| d.applies_to(env)) {
                queue.push_back((root, Some(origin.clone()), dep));
            }
        }

        while let Some((from, origin, dep)) = queue.pop_front() {
            let pkg = selected.get(&dep.name).ok_or_else(|| SolutionError::Missing {
                name: dep.name.clone(),
                env: env.label(),
            })?;
            let first_visit = !this.index.contains_key(&pkg.name);
            let to = this.add_node(GraphNode::Package {
                name: pkg.name.clone(),
                version: pkg.version.clone(),
            });
            if from != to {
                this.add_edge(
                    from,
                    to,
                    DepEdge {
                        root: origin,
                        extras: dep.extras.clone(),
                    },
                );
            }

            let extras = enabled.entry(pkg.name.clone()).or_default();
            if first_visit {
                for next in pkg.dependencies.iter().filter(|d| d.applies_to(env)) {
                    queue.push_back((to, None, next));
                }
            }
            for extra in &dep.extras {
                if extras.insert(extra.clone()) {
                    let deps = pkg.optional_dependencies.get(extra).into_iter().flatten();
                    for next in deps.filter(|d| d.applies_to(env)) {
                        queue.push_back((to, None, next));
                    }
                }
            }
        }
        Ok(this)
    }

    /// Add or retrieve a node. Packages are keyed by name.
    pub fn add_node(&mut self, node: GraphNode) -> NodeIndex {
        let Some(name) = node.name().cloned() else {
            return self.root;
        };
        if let Some(&idx) = self.index.get(&name) {
            return idx;
        }
        let idx = self.graph.add_node(node);
        self.index.insert(name, idx);
        idx
    }

    /// Add an edge, keeping at most one per node pair.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, edge: DepEdge) {
        match self.graph.find_edge(from, to) {
            Some(existing) => {
                let weight = &mut self.graph[existing];
                for extra in edge.extras {
                    if !weight.extras.contains(&extra) {
                        weight.extras.push(extra);
                    }
                }
                if weight.root.is_none() {
                    weight.root = edge.root;
                }
            }
            None => {
                self.graph.add_edge(from, to, edge);
            }
        }
    }

    pub fn find(&self, name: &PackageName) -> Option<NodeIndex> {
        self.index.get(name).copied()
    }

    /// Package names with dependencies before their dependents. Members of
    /// a cycle are ordered by name.
    pub fn install_order(&self) -> Vec<PackageName> {
        let mut order = Vec::new();
        for mut component in tarjan_scc(&self.graph) {
            component.retain(|&idx| idx != self.root);
            let mut names: Vec<PackageName> = component
                .iter()
                .filter_map(|&idx| self.graph[idx].name().cloned())
                .collect();
            names.sort();
            order.extend(names);
        }
        order
    }

    /// Number of packages (the project node excluded).
    pub fn len(&self) -> usize {
        self.graph.node_count().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::environment::Platform;
    use tern_core::requirement::PackageSource;
    use tern_core::solution::ResolvedPackage;

    fn name(s: &str) -> PackageName {
        PackageName::new(s).unwrap()
    }

    fn pkg(n: &str, v: &str, deps: &[&str]) -> ResolvedPackage {
        let mut p = ResolvedPackage::new(
            name(n),
            Version::parse(v).unwrap(),
            PackageSource::registry("https://pypi.org/simple"),
        );
        p.dependencies = deps.iter().map(|d| d.parse().unwrap()).collect();
        p
    }

    fn linux() -> TargetEnvironment {
        TargetEnvironment::new(Platform::Linux, "x86_64", &Version::new([3, 12]))
    }

    fn sample() -> Solution {
        let mut solution = Solution {
            regions: Vec::new(),
            roots: BTreeMap::new(),
            packages: vec![
                pkg("app", "1.0", &["lib", r#"winonly; sys_platform == "win32""#]),
                pkg("lib", "2.0", &["base"]),
                pkg("base", "0.3", &[]),
                pkg("pytest", "8.0", &["base"]),
            ],
        };
        solution
            .roots
            .insert(RequirementRoot::Runtime, vec!["app".parse().unwrap()]);
        solution.roots.insert(
            RequirementRoot::DevGroup(ExtraName::new("dev").unwrap()),
            vec!["pytest".parse().unwrap()],
        );
        solution
    }

    #[test]
    fn follows_only_selected_roots_and_applicable_edges() {
        let graph =
            DependencyGraph::for_environment(&sample(), &linux(), &RootSelection::runtime_only())
                .unwrap();
        assert_eq!(graph.len(), 3);
        assert!(graph.find(&name("pytest")).is_none());
        assert!(graph.find(&name("winonly")).is_none());
    }

    #[test]
    fn install_order_puts_dependencies_first() {
        let solution = sample();
        let graph = DependencyGraph::for_environment(
            &solution,
            &linux(),
            &RootSelection::all(&[]),
        )
        .unwrap();
        let order = graph.install_order();
        let pos = |n: &str| order.iter().position(|x| x.as_str() == n).unwrap();
        assert!(pos("base") < pos("lib"));
        assert!(pos("lib") < pos("app"));
    }

    #[test]
    fn selected_dev_groups_join_the_graph() {
        let mut selection = RootSelection::runtime_only();
        selection.groups.insert(ExtraName::new("dev").unwrap());
        let graph = DependencyGraph::for_environment(&sample(), &linux(), &selection).unwrap();
        assert_eq!(graph.len(), 4);
        assert!(graph.find(&name("pytest")).is_some());
        let order = graph.install_order();
        let pos = |n: &str| order.iter().position(|x| x.as_str() == n).unwrap();
        assert!(pos("base") < pos("pytest"));
    }

    #[test]
    fn cycles_are_tolerated() {
        let mut solution = Solution::default();
        solution.packages = vec![pkg("a", "1.0", &["b"]), pkg("b", "1.0", &["a"])];
        solution
            .roots
            .insert(RequirementRoot::Runtime, vec!["a".parse().unwrap()]);
        let graph =
            DependencyGraph::for_environment(&solution, &linux(), &RootSelection::runtime_only())
                .unwrap();
        assert_eq!(graph.install_order(), vec![name("a"), name("b")]);
    }
}
