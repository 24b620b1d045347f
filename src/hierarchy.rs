use std::collections::{HashSet, VecDeque};

use crate::domain::{ContinentTable, Hierarchy, RawTable, RegionNode, Subregions};
use crate::table::PageTableExtractor;

pub struct HierarchyBuilder<'a, E: PageTableExtractor + ?Sized> {
    extractor: &'a E,
}

impl<'a, E: PageTableExtractor + ?Sized> HierarchyBuilder<'a, E> {
    pub fn new(extractor: &'a E) -> Self {
        Self { extractor }
    }

    pub fn build(&self, roots: &[ContinentTable]) -> Hierarchy {
        let mut visited: HashSet<String> = HashSet::new();
        let mut leaves: Vec<String> = Vec::new();
        let mut regions: Vec<RegionNode> = Vec::new();
        let mut queue: VecDeque<(Vec<usize>, RawTable)> = VecDeque::new();

        for root in roots {
            if !visited.insert(root.name.clone()) {
                continue;
            }
            match root.table.as_ref().filter(|table| !table.rows.is_empty()) {
                Some(table) => {
                    queue.push_back((vec![regions.len()], table.clone()));
                    regions.push(RegionNode {
                        name: root.name.clone(),
                        children: Subregions::Nested(Vec::new()),
                    });
                }
                None => {
                    leaves.push(root.name.clone());
                    regions.push(RegionNode::leaf(root.name.clone()));
                }
            }
        }

        let mut expanded = 0usize;
        while let Some((path, table)) = queue.pop_front() {
            let mut children = Vec::new();
            for row in &table.rows {
                if !visited.insert(row.subregion.clone()) {
                    tracing::debug!(region = %row.subregion, page = %table.page_url, "skipping cross-listed region");
                    continue;
                }
                match self.subregion_table(&row.subregion_url) {
                    Some(sub_table) => {
                        let mut child_path = path.clone();
                        child_path.push(children.len());
                        queue.push_back((child_path, sub_table));
                        children.push(RegionNode {
                            name: row.subregion.clone(),
                            children: Subregions::Nested(Vec::new()),
                        });
                    }
                    None => {
                        leaves.push(row.subregion.clone());
                        children.push(RegionNode::leaf(row.subregion.clone()));
                    }
                }
            }

            let Some(node) = node_at_mut(&mut regions, &path) else {
                continue;
            };
            if children.is_empty() {
                // Every listed subregion already lives elsewhere in the tree.
                node.children = Subregions::Leaf;
                leaves.push(node.name.clone());
            } else {
                node.children = Subregions::Nested(children);
            }
            expanded += 1;
        }

        tracing::info!(
            regions = visited.len(),
            expanded,
            leaves = leaves.len(),
            "region tier compiled"
        );

        Hierarchy {
            regions,
            non_subregions: unique_everseen(leaves),
        }
    }

    fn subregion_table(&self, page_url: &str) -> Option<RawTable> {
        if page_url.is_empty() {
            return None;
        }
        match self.extractor.subregion_table(page_url) {
            Ok(Some(table)) if !table.rows.is_empty() => Some(table),
            Ok(_) => {
                tracing::debug!(page = page_url, "no subregions");
                None
            }
            Err(err) => {
                tracing::warn!(page = page_url, error = %err, "treating region as leaf");
                None
            }
        }
    }
}

pub fn collect_continent_tables<E: PageTableExtractor + ?Sized>(
    extractor: &E,
    links: Vec<(String, String)>,
) -> Vec<ContinentTable> {
    links
        .into_iter()
        .map(|(name, url)| {
            let table = match extractor.subregion_table(&url) {
                Ok(table) => table,
                Err(err) => {
                    tracing::warn!(continent = %name, error = %err, "continent table unavailable");
                    None
                }
            };
            ContinentTable { name, url, table }
        })
        .collect()
}

fn node_at_mut<'n>(regions: &'n mut [RegionNode], path: &[usize]) -> Option<&'n mut RegionNode> {
    let (first, rest) = path.split_first()?;
    let mut node = regions.get_mut(*first)?;
    for &position in rest {
        node = match &mut node.children {
            Subregions::Nested(children) => children.get_mut(position)?,
            Subregions::Leaf => return None,
        };
    }
    Some(node)
}

fn unique_everseen(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_everseen_keeps_first_occurrence() {
        let names = ["Russian Federation", "Malta", "Russian Federation", "Japan"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            unique_everseen(names),
            vec!["Russian Federation", "Malta", "Japan"]
        );
    }

    #[test]
    fn node_lookup_by_path() {
        let mut regions = vec![RegionNode {
            name: "Europe".to_string(),
            children: Subregions::Nested(vec![RegionNode::leaf("Malta")]),
        }];
        assert_eq!(node_at_mut(&mut regions, &[0, 0]).unwrap().name, "Malta");
        assert!(node_at_mut(&mut regions, &[0, 0, 0]).is_none());
        assert!(node_at_mut(&mut regions, &[]).is_none());
    }
}
