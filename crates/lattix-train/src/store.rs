//! Read-only knowledge graph artifacts consumed by the pipeline.
//!
//! The generator workers, the trainer and the evaluator all read from a
//! [`KnowledgeGraphStore`]. Every accessor hands out an owned copy, so each
//! worker keeps an independent immutable snapshot for its whole lifetime.
//!
//! # Corruption bias
//!
//! For Bernoulli sampling each relation carries the probability that a
//! negative keeps the tail and replaces the head:
//!
//! ```text
//! tph = mean number of tails per (head, relation)
//! hpt = mean number of heads per (relation, tail)
//! bias[r] = tph / (tph + hpt)
//! ```
//!
//! One-to-many relations (large `tph`) therefore corrupt the head more often,
//! which makes accidental positives less likely.

use crate::error::{Error, Result};
use crate::triple::Triple;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{BufRead, BufReader};
use std::path::Path;

/// `(entity, relation) -> entities` co-occurrence index.
pub type CooccurrenceIndex = HashMap<(usize, usize), HashSet<usize>>;

/// Vocabulary sizes and split sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KgMeta {
    pub tot_entity: usize,
    pub tot_relation: usize,
    pub tot_train_triples: usize,
    pub tot_valid_triples: usize,
    pub tot_test_triples: usize,
}

/// Names of the cached artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    TripletsTrain,
    RelationProperty,
    HrTTrain,
    TrHTrain,
    Idx2Entity,
    Idx2Relation,
}

impl CacheKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TripletsTrain => "triplets_train",
            Self::RelationProperty => "relationproperty",
            Self::HrTTrain => "hr_t_train",
            Self::TrHTrain => "tr_h_train",
            Self::Idx2Entity => "idx2entity",
            Self::Idx2Relation => "idx2relation",
        }
    }
}

impl std::str::FromStr for CacheKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "triplets_train" => Ok(Self::TripletsTrain),
            "relationproperty" => Ok(Self::RelationProperty),
            "hr_t_train" => Ok(Self::HrTTrain),
            "tr_h_train" => Ok(Self::TrHTrain),
            "idx2entity" => Ok(Self::Idx2Entity),
            "idx2relation" => Ok(Self::Idx2Relation),
            other => Err(Error::Validation(format!("unknown cache key: {other}"))),
        }
    }
}

/// Payload returned by [`KnowledgeGraphStore::read_cache_data`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheData {
    Triples(Vec<Triple>),
    RelationBias(HashMap<usize, f64>),
    Index(CooccurrenceIndex),
    Labels(BTreeMap<usize, String>),
}

/// Read-only provider of cached knowledge graph artifacts.
///
/// Implementations must be safe to call concurrently from several workers.
pub trait KnowledgeGraphStore: Send + Sync {
    /// Vocabulary and split sizes.
    fn meta(&self) -> KgMeta;

    /// Training triples.
    fn triplets_train(&self) -> Vec<Triple>;

    /// Validation triples.
    fn triplets_valid(&self) -> Vec<Triple>;

    /// Test triples.
    fn triplets_test(&self) -> Vec<Triple>;

    /// Probability in [0, 1] of keeping the tail (corrupting the head), per relation.
    fn relation_property(&self) -> HashMap<usize, f64>;

    /// Valid tails for every `(head, relation)` in the training split.
    fn hr_t_train(&self) -> CooccurrenceIndex;

    /// Valid heads for every `(tail, relation)` in the training split.
    fn tr_h_train(&self) -> CooccurrenceIndex;

    /// Entity labels by id.
    fn idx2entity(&self) -> BTreeMap<usize, String>;

    /// Relation labels by id.
    fn idx2relation(&self) -> BTreeMap<usize, String>;

    /// Keyed access to the cached artifacts.
    fn read_cache_data(&self, key: CacheKey) -> CacheData {
        match key {
            CacheKey::TripletsTrain => CacheData::Triples(self.triplets_train()),
            CacheKey::RelationProperty => CacheData::RelationBias(self.relation_property()),
            CacheKey::HrTTrain => CacheData::Index(self.hr_t_train()),
            CacheKey::TrHTrain => CacheData::Index(self.tr_h_train()),
            CacheKey::Idx2Entity => CacheData::Labels(self.idx2entity()),
            CacheKey::Idx2Relation => CacheData::Labels(self.idx2relation()),
        }
    }
}

/// In-memory knowledge graph with dense ids.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    entities: Vec<String>,
    relations: Vec<String>,
    train: Vec<Triple>,
    valid: Vec<Triple>,
    test: Vec<Triple>,
    relation_property: HashMap<usize, f64>,
    hr_t: CooccurrenceIndex,
    tr_h: CooccurrenceIndex,
}

impl KnowledgeGraph {
    /// Build from labeled splits; ids are assigned in first-seen order.
    pub fn from_labeled<S: AsRef<str>>(
        train: &[(S, S, S)],
        valid: &[(S, S, S)],
        test: &[(S, S, S)],
    ) -> Self {
        let mut entity_ids: HashMap<String, usize> = HashMap::new();
        let mut relation_ids: HashMap<String, usize> = HashMap::new();
        let mut entities = Vec::new();
        let mut relations = Vec::new();

        let mut encode = |split: &[(S, S, S)]| -> Vec<Triple> {
            split
                .iter()
                .map(|(h, r, t)| {
                    let head = intern(&mut entity_ids, &mut entities, h.as_ref());
                    let relation = intern(&mut relation_ids, &mut relations, r.as_ref());
                    let tail = intern(&mut entity_ids, &mut entities, t.as_ref());
                    Triple::new(head, relation, tail)
                })
                .collect()
        };

        let train = encode(train);
        let valid = encode(valid);
        let test = encode(test);

        Self::assemble(entities, relations, train, valid, test)
    }

    /// Build from id-encoded splits; labels are synthesized as `e{id}` / `r{id}`.
    pub fn from_ids(
        num_entities: usize,
        num_relations: usize,
        train: Vec<Triple>,
        valid: Vec<Triple>,
        test: Vec<Triple>,
    ) -> Result<Self> {
        for t in train.iter().chain(&valid).chain(&test) {
            if t.head >= num_entities {
                return Err(Error::EntityNotFound(t.head));
            }
            if t.tail >= num_entities {
                return Err(Error::EntityNotFound(t.tail));
            }
            if t.relation >= num_relations {
                return Err(Error::RelationNotFound(t.relation));
            }
        }
        let entities = (0..num_entities).map(|i| format!("e{i}")).collect();
        let relations = (0..num_relations).map(|i| format!("r{i}")).collect();
        Ok(Self::assemble(entities, relations, train, valid, test))
    }

    /// Read tab-separated `head\trelation\ttail` files.
    pub fn from_tsv_files(
        train: impl AsRef<Path>,
        valid: impl AsRef<Path>,
        test: impl AsRef<Path>,
    ) -> Result<Self> {
        let train = read_tsv(train.as_ref())?;
        let valid = read_tsv(valid.as_ref())?;
        let test = read_tsv(test.as_ref())?;
        let kg = Self::from_labeled(&train, &valid, &test);
        tracing::info!(
            entities = kg.entities.len(),
            relations = kg.relations.len(),
            train = kg.train.len(),
            "loaded knowledge graph"
        );
        Ok(kg)
    }

    fn assemble(
        entities: Vec<String>,
        relations: Vec<String>,
        train: Vec<Triple>,
        valid: Vec<Triple>,
        test: Vec<Triple>,
    ) -> Self {
        let mut hr_t: CooccurrenceIndex = HashMap::new();
        let mut tr_h: CooccurrenceIndex = HashMap::new();
        for t in &train {
            hr_t.entry((t.head, t.relation)).or_default().insert(t.tail);
            tr_h.entry((t.tail, t.relation)).or_default().insert(t.head);
        }

        let all: Vec<Triple> = train.iter().chain(&valid).chain(&test).copied().collect();
        let relation_property = bernoulli_bias(&all, relations.len());

        Self {
            entities,
            relations,
            train,
            valid,
            test,
            relation_property,
            hr_t,
            tr_h,
        }
    }
}

fn intern(ids: &mut HashMap<String, usize>, labels: &mut Vec<String>, label: &str) -> usize {
    if let Some(&id) = ids.get(label) {
        return id;
    }
    labels.push(label.to_string());
    ids.insert(label.to_string(), labels.len() - 1);
    labels.len() - 1
}

/// `tph / (tph + hpt)` per relation; relations without triples get 0.5.
fn bernoulli_bias(triples: &[Triple], num_relations: usize) -> HashMap<usize, f64> {
    let mut tails_per_head: HashMap<usize, HashMap<usize, HashSet<usize>>> = HashMap::new();
    let mut heads_per_tail: HashMap<usize, HashMap<usize, HashSet<usize>>> = HashMap::new();
    for t in triples {
        tails_per_head
            .entry(t.relation)
            .or_default()
            .entry(t.head)
            .or_default()
            .insert(t.tail);
        heads_per_tail
            .entry(t.relation)
            .or_default()
            .entry(t.tail)
            .or_default()
            .insert(t.head);
    }

    let mean = |groups: Option<&HashMap<usize, HashSet<usize>>>| -> f64 {
        match groups {
            Some(g) if !g.is_empty() => {
                g.values().map(|s| s.len() as f64).sum::<f64>() / g.len() as f64
            }
            _ => 0.0,
        }
    };

    (0..num_relations)
        .map(|r| {
            let tph = mean(tails_per_head.get(&r));
            let hpt = mean(heads_per_tail.get(&r));
            let bias = if tph + hpt > 0.0 { tph / (tph + hpt) } else { 0.5 };
            (r, bias)
        })
        .collect()
}

fn read_tsv(path: &Path) -> Result<Vec<(String, String, String)>> {
    let file = std::fs::File::open(path)?;
    let mut out = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        match parts.as_slice() {
            [h, r, t] => out.push((h.to_string(), r.to_string(), t.to_string())),
            _ => {
                return Err(Error::Validation(format!(
                    "{}:{}: expected 3 tab-separated fields, found {}",
                    path.display(),
                    lineno + 1,
                    parts.len()
                )))
            }
        }
    }
    Ok(out)
}

impl KnowledgeGraphStore for KnowledgeGraph {
    fn meta(&self) -> KgMeta {
        KgMeta {
            tot_entity: self.entities.len(),
            tot_relation: self.relations.len(),
            tot_train_triples: self.train.len(),
            tot_valid_triples: self.valid.len(),
            tot_test_triples: self.test.len(),
        }
    }

    fn triplets_train(&self) -> Vec<Triple> {
        self.train.clone()
    }

    fn triplets_valid(&self) -> Vec<Triple> {
        self.valid.clone()
    }

    fn triplets_test(&self) -> Vec<Triple> {
        self.test.clone()
    }

    fn relation_property(&self) -> HashMap<usize, f64> {
        self.relation_property.clone()
    }

    fn hr_t_train(&self) -> CooccurrenceIndex {
        self.hr_t.clone()
    }

    fn tr_h_train(&self) -> CooccurrenceIndex {
        self.tr_h.clone()
    }

    fn idx2entity(&self) -> BTreeMap<usize, String> {
        self.entities.iter().cloned().enumerate().collect()
    }

    fn idx2relation(&self) -> BTreeMap<usize, String> {
        self.relations.iter().cloned().enumerate().collect()
    }
}
