//! Duplicate clustering.
//!
//! Records carrying a canonical identifier are grouped by exact equality of
//! that identifier. Records without one are partitioned by blocking key and
//! compared pairwise inside each block. Both kinds of evidence feed a single
//! union-find keyed by record index, whose connected components are the
//! clusters.

use std::collections::{BTreeMap, HashMap};

use crate::blocking::{blocking_key, is_blockable};
use crate::config::MatchingConfig;
use crate::models::{ProductRecord, RecordIndex, RecordSchema};
use crate::normalize::CanonicalId;
use crate::similarity::{PreparedTitle, SimilarityScorer};

/// Two records judged to be the same product.
pub type MatchPair = (RecordIndex, RecordIndex);

#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    /// Add a singleton set and return its element.
    pub fn push(&mut self) -> usize {
        let idx = self.parent.len();
        self.parent.push(idx);
        self.rank.push(0);
        idx
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    /// Join the sets of `left` and `right`. Returns `None` when they were
    /// already joined.
    pub fn union(&mut self, left: usize, right: usize) -> Option<Absorption> {
        let left_root = self.find(left);
        let right_root = self.find(right);

        if left_root == right_root {
            return None;
        }

        let left_rank = self.rank[left_root];
        let right_rank = self.rank[right_root];

        let (kept, absorbed) = if left_rank < right_rank {
            (right_root, left_root)
        } else {
            if left_rank == right_rank {
                self.rank[left_root] += 1;
            }
            (left_root, right_root)
        };
        self.parent[absorbed] = kept;
        Some(Absorption { kept, absorbed })
    }
}

/// Result of a union: `absorbed` is no longer a root, `kept` is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Absorption {
    pub kept: RecordIndex,
    pub absorbed: RecordIndex,
}

/// A set of records believed to describe the same product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    members: Vec<RecordIndex>,
}

impl Cluster {
    /// Members in ascending index order.
    pub fn members(&self) -> &[RecordIndex] {
        &self.members
    }

    /// Smallest member index.
    pub fn anchor(&self) -> RecordIndex {
        self.members[0]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Matching keys derived from one record. At most one of the two is set:
/// a record with a canonical identifier never enters a block.
#[derive(Debug, Clone)]
pub struct RecordKeys {
    pub canonical_id: Option<CanonicalId>,
    pub block: Option<(String, PreparedTitle)>,
}

impl RecordKeys {
    pub fn derive(schema: &RecordSchema, record: &ProductRecord, prefix_len: usize) -> Self {
        if let Some(id) = schema.canonical_id(record) {
            return Self {
                canonical_id: Some(id),
                block: None,
            };
        }

        let title = schema.title(record).unwrap_or("");
        let block = is_blockable(title).then(|| {
            let brand = schema.brand(record).unwrap_or("");
            (blocking_key(brand, title, prefix_len), PreparedTitle::new(title))
        });

        Self {
            canonical_id: None,
            block,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub index: RecordIndex,
    pub title: PreparedTitle,
}

/// One unit of fuzzy-matching work: the records of a block that arrived in
/// the current chunk, plus the ones that were already there.
#[derive(Debug, Clone, Copy)]
pub struct BlockTask<'a> {
    pub key: &'a str,
    pub resident: &'a [BlockEntry],
    pub incoming: &'a [BlockEntry],
}

impl BlockTask<'_> {
    pub fn comparisons(&self) -> u64 {
        let n = self.incoming.len() as u64;
        n * self.resident.len() as u64 + n * n.saturating_sub(1) / 2
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockOutcome {
    pub pairs: Vec<MatchPair>,
    pub comparisons: u64,
}

/// Compare every incoming entry with every resident entry and with every
/// later incoming entry. Pure: depends only on the task and the scorer.
pub fn compare_block(task: &BlockTask<'_>, scorer: &SimilarityScorer) -> BlockOutcome {
    let mut outcome = BlockOutcome::default();
    for (i, entry) in task.incoming.iter().enumerate() {
        for other in task.resident.iter().chain(&task.incoming[i + 1..]) {
            outcome.comparisons += 1;
            if scorer.is_match(&entry.title, &other.title) {
                outcome.pairs.push((other.index, entry.index));
            }
        }
    }
    outcome
}

#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub index: RecordIndex,
    /// Set when the record joined an existing exact-identifier group.
    pub absorption: Option<Absorption>,
}

/// Incremental cluster state for one run.
///
/// Lives from the first chunk to the end of the run. Records are admitted
/// chunk by chunk; fuzzy work for the chunk is exposed as [`BlockTask`]s and
/// its accepted pairs are applied with [`ClusterIndex::commit_chunk`].
#[derive(Debug, Default)]
pub struct ClusterIndex {
    sets: DisjointSet,
    by_id: HashMap<CanonicalId, RecordIndex>,
    blocks: HashMap<String, Vec<BlockEntry>>,
    pending: BTreeMap<String, Vec<BlockEntry>>,
}

impl Default for DisjointSet {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ClusterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records admitted so far.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn distinct_ids(&self) -> usize {
        self.by_id.len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len() + self.pending.keys().filter(|k| !self.blocks.contains_key(*k)).count()
    }

    /// Give the record the next index. Records with an identifier are joined
    /// to the first record seen with the same identifier; records with a
    /// blocking key are staged for the current chunk's block tasks.
    pub fn admit(&mut self, keys: RecordKeys) -> Admission {
        let index = self.sets.push();

        if let Some(id) = keys.canonical_id {
            let anchor = *self.by_id.entry(id).or_insert(index);
            let absorption = if anchor == index {
                None
            } else {
                self.sets.union(anchor, index)
            };
            return Admission { index, absorption };
        }

        if let Some((key, title)) = keys.block {
            self.pending
                .entry(key)
                .or_default()
                .push(BlockEntry { index, title });
        }

        Admission {
            index,
            absorption: None,
        }
    }

    /// Block tasks for the staged records, in key order.
    pub fn pending_tasks(&self) -> Vec<BlockTask<'_>> {
        self.pending
            .iter()
            .map(|(key, incoming)| BlockTask {
                key: key.as_str(),
                resident: self.blocks.get(key).map(Vec::as_slice).unwrap_or(&[]),
                incoming: incoming.as_slice(),
            })
            .collect()
    }

    /// Apply accepted pairs and move staged records into their blocks.
    pub fn commit_chunk<I>(&mut self, pairs: I) -> Vec<Absorption>
    where
        I: IntoIterator<Item = MatchPair>,
    {
        let absorptions = pairs
            .into_iter()
            .filter_map(|(left, right)| self.sets.union(left, right))
            .collect();

        for (key, entries) in std::mem::take(&mut self.pending) {
            self.blocks.entry(key).or_default().extend(entries);
        }

        absorptions
    }

    /// Final partition of every admitted record, ordered by anchor.
    pub fn clusters(&mut self) -> Vec<Cluster> {
        let mut components: HashMap<usize, Vec<RecordIndex>> = HashMap::new();
        for idx in 0..self.sets.len() {
            let root = self.sets.find(idx);
            components.entry(root).or_default().push(idx);
        }

        let mut clusters: Vec<Cluster> = components
            .into_values()
            .map(|members| Cluster { members })
            .collect();
        clusters.sort_by_key(Cluster::anchor);
        clusters
    }
}

/// Cluster an in-memory batch on the current thread.
pub fn build_clusters(
    schema: &RecordSchema,
    records: &[ProductRecord],
    matching: &MatchingConfig,
) -> Vec<Cluster> {
    let scorer = matching.scorer();
    let mut index = ClusterIndex::new();
    for record in records {
        index.admit(RecordKeys::derive(schema, record, matching.blocking_prefix_length));
    }

    let pairs: Vec<MatchPair> = index
        .pending_tasks()
        .iter()
        .flat_map(|task| compare_block(task, &scorer).pairs)
        .collect();
    index.commit_chunk(pairs);
    index.clusters()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{product, product_schema};

    fn matching(threshold: f64) -> MatchingConfig {
        MatchingConfig {
            similarity_threshold: threshold,
            ..MatchingConfig::default()
        }
    }

    fn member_sets(clusters: &[Cluster]) -> Vec<Vec<RecordIndex>> {
        clusters.iter().map(|c| c.members().to_vec()).collect()
    }

    #[test]
    fn disjoint_set_unions_transitively() {
        let mut dsu = DisjointSet::new(4);
        assert!(dsu.union(0, 1).is_some());
        assert!(dsu.union(2, 3).is_some());
        assert!(dsu.union(1, 0).is_none());
        assert!(dsu.union(3, 0).is_some());
        assert_eq!(dsu.find(2), dsu.find(1));
    }

    #[test]
    fn disjoint_set_push_grows() {
        let mut dsu = DisjointSet::default();
        assert_eq!(dsu.push(), 0);
        assert_eq!(dsu.push(), 1);
        assert_eq!(dsu.len(), 2);
        assert_ne!(dsu.find(0), dsu.find(1));
    }

    #[test]
    fn union_reports_the_surviving_root() {
        let mut dsu = DisjointSet::new(3);
        let first = dsu.union(0, 1).unwrap();
        assert_eq!(first, Absorption { kept: 0, absorbed: 1 });
        // Rank of {0,1} is higher, so the singleton is absorbed.
        let second = dsu.union(2, 1).unwrap();
        assert_eq!(second, Absorption { kept: 0, absorbed: 2 });
    }

    #[test]
    fn exact_ids_group_regardless_of_titles() {
        let schema = product_schema();
        let records = vec![
            product(Some("A-1"), "Nike", "Red Shoe", &["u1"]),
            product(Some("b2"), "Acme", "Anvil", &[]),
            product(Some("a1"), "Nike", "Totally different", &["u2"]),
        ];
        let clusters = build_clusters(&schema, &records, &matching(90.0));
        assert_eq!(member_sets(&clusters), vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn records_with_ids_are_never_fuzzy_matched() {
        let schema = product_schema();
        let records = vec![
            product(Some("X1"), "Nike", "Red Shoe", &[]),
            product(None, "Nike", "Red Shoe", &[]),
        ];
        let clusters = build_clusters(&schema, &records, &matching(0.0));
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn fuzzy_matches_only_inside_a_block() {
        let schema = product_schema();
        let records = vec![
            product(None, "Adidas", "Blu Socks", &[]),
            product(None, "Adidas", "Blue Socks", &[]),
            product(None, "Puma", "Blue Socks", &[]),
        ];
        let clusters = build_clusters(&schema, &records, &matching(80.0));
        assert_eq!(member_sets(&clusters), vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn fuzzy_clusters_are_transitive() {
        let schema = product_schema();
        // a~b and b~c, but a and c alone do not match at this threshold.
        let records = vec![
            product(None, "Adidas", "Blu Socks", &[]),
            product(None, "Adidas", "Blue Socks", &[]),
            product(None, "Adidas", "Blue Sockss", &[]),
        ];
        let matching = matching(85.0);
        let scorer = matching.scorer();
        let a = PreparedTitle::new("Blu Socks");
        let c = PreparedTitle::new("Blue Sockss");
        assert!(!scorer.is_match(&a, &c));

        let clusters = build_clusters(&schema, &records, &matching);
        assert_eq!(member_sets(&clusters), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn empty_titles_stay_singletons() {
        let schema = product_schema();
        let records = vec![
            product(None, "", "", &[]),
            product(None, "", "", &[]),
            product(None, "Nike", "!!", &[]),
        ];
        let clusters = build_clusters(&schema, &records, &matching(0.0));
        assert_eq!(clusters.len(), 3);
    }

    #[test]
    fn unblockable_records_get_no_block_key() {
        let schema = product_schema();
        let keys = RecordKeys::derive(&schema, &product(None, "Nike", " ?! ", &[]), 3);
        assert!(keys.canonical_id.is_none());
        assert!(keys.block.is_none());

        let keys = RecordKeys::derive(&schema, &product(None, "Nike", "Red Shoe", &[]), 3);
        let (key, title) = keys.block.unwrap();
        assert_eq!(key, "nike|red");
        assert!(!title.is_empty());
    }

    #[test]
    fn blocks_span_chunks() {
        let schema = product_schema();
        let matching = matching(80.0);
        let scorer = matching.scorer();
        let mut index = ClusterIndex::new();

        let first = product(None, "Adidas", "Blu Socks", &[]);
        index.admit(RecordKeys::derive(&schema, &first, 3));
        let pairs: Vec<MatchPair> = index
            .pending_tasks()
            .iter()
            .flat_map(|t| compare_block(t, &scorer).pairs)
            .collect();
        assert!(index.commit_chunk(pairs).is_empty());

        let second = product(None, "Adidas", "Blue Socks", &[]);
        index.admit(RecordKeys::derive(&schema, &second, 3));
        let tasks = index.pending_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].resident.len(), 1);
        assert_eq!(tasks[0].comparisons(), 1);
        let pairs: Vec<MatchPair> = tasks
            .iter()
            .flat_map(|t| compare_block(t, &scorer).pairs)
            .collect();
        let absorptions = index.commit_chunk(pairs);
        assert_eq!(absorptions.len(), 1);
        assert_eq!(member_sets(&index.clusters()), vec![vec![0, 1]]);
    }

    #[test]
    fn compare_block_counts_each_pair_once() {
        let scorer = MatchingConfig::default().scorer();
        let entries: Vec<BlockEntry> = (0..4)
            .map(|index| BlockEntry {
                index,
                title: PreparedTitle::new("same title"),
            })
            .collect();
        let task = BlockTask {
            key: "k|sam",
            resident: &entries[..1],
            incoming: &entries[1..],
        };
        let outcome = compare_block(&task, &scorer);
        assert_eq!(outcome.comparisons, 6);
        assert_eq!(outcome.comparisons, task.comparisons());
        assert_eq!(outcome.pairs.len(), 6);
    }

    #[test]
    fn clusters_partition_the_input() {
        let schema = product_schema();
        let records = vec![
            product(Some("A1"), "Nike", "Red Shoe", &[]),
            product(None, "Nike", "Red Shoe", &[]),
            product(Some("A1"), "Nike", "Red Shoes", &[]),
            product(None, "Nike", "Red Shoes", &[]),
            product(None, "", "", &[]),
        ];
        let clusters = build_clusters(&schema, &records, &matching(85.0));
        let mut seen: Vec<RecordIndex> = clusters.iter().flat_map(|c| c.members().to_vec()).collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
