//! Weight persistence and embedding export through the trainer.

use lattix_train::{export, KgeModel, KnowledgeGraph, KnowledgeGraphStore, Trainer, TrainerConfig, TransE, Triple};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn store() -> Arc<dyn KnowledgeGraphStore> {
    let train = [
        ("paris", "capital_of", "france"),
        ("berlin", "capital_of", "germany"),
        ("rome", "capital_of", "italy"),
        ("france", "borders", "germany"),
        ("germany", "borders", "france"),
        ("italy", "borders", "france"),
    ];
    let test = [("france", "borders", "italy")];
    Arc::new(KnowledgeGraph::from_labeled(&train, &[], &test))
}

fn config(dir: &TempDir) -> TrainerConfig {
    let mut config = TrainerConfig::default()
        .with_batch_size(3)
        .with_workers(1)
        .with_hidden_size(4)
        .with_epochs(2)
        .with_seed(11);
    config.path_tmp = dir.path().join("tmp");
    config.path_embeddings = dir.path().join("embeddings");
    config.path_result = Some(dir.path().join("results"));
    config
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.save_model = true;

    let mut trainer = Trainer::new(TransE::new(4, 1.0, true), config.clone(), store()).with_progress(false);
    trainer.train_model().unwrap();
    let saved = trainer.model().parameters().to_vec();
    assert!(dir.path().join("tmp/TransE").join(export::MODEL_FILE).exists());

    let mut restored = Trainer::new(TransE::new(4, 1.0, true), config, store());
    restored.build_model().unwrap();
    assert_ne!(restored.model().parameters(), saved.as_slice());
    assert!(restored.load_model().unwrap());
    assert_eq!(restored.model().parameters(), saved.as_slice());
}

#[test]
fn test_load_without_saved_weights() {
    let dir = TempDir::new().unwrap();
    let mut trainer = Trainer::new(TransE::new(4, 1.0, true), config(&dir), store());
    trainer.build_model().unwrap();
    let before = trainer.model().parameters().to_vec();
    assert!(!trainer.load_model().unwrap());
    assert_eq!(trainer.model().parameters(), before.as_slice());
}

#[test]
fn test_load_rejects_wrong_shape() {
    let dir = TempDir::new().unwrap();
    let mut small = Trainer::new(TransE::new(4, 1.0, true), config(&dir), store());
    small.build_model().unwrap();
    small.save_model().unwrap();

    let mut wide = Trainer::new(TransE::new(6, 1.0, true), config(&dir), store());
    wide.build_model().unwrap();
    assert!(wide.load_model().is_err());
}

#[test]
fn test_export_writes_labels_and_tensors() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.export_embeddings = true;

    let mut trainer = Trainer::new(TransE::new(4, 1.0, true), config, store()).with_progress(false);
    trainer.train_model().unwrap();

    let out = dir.path().join("embeddings/TransE");
    let ent_labels = fs::read_to_string(out.join("ent_labels.tsv")).unwrap();
    assert_eq!(ent_labels.lines().collect::<Vec<_>>(), vec!["paris", "france", "berlin", "germany", "rome", "italy"]);

    let rel_json: BTreeMap<usize, String> =
        serde_json::from_str(&fs::read_to_string(out.join("rel_labels.json")).unwrap()).unwrap();
    assert_eq!(rel_json[&0], "capital_of");
    assert_eq!(rel_json[&1], "borders");

    let ent_tsv = fs::read_to_string(out.join("ent_embedding.tsv")).unwrap();
    let rows: Vec<Vec<f32>> = ent_tsv
        .lines()
        .map(|l| l.split('\t').map(|x| x.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 6);
    assert!(rows.iter().all(|r| r.len() == 4));

    let rel_rows: Vec<Vec<f32>> =
        serde_json::from_str(&fs::read_to_string(out.join("rel_embedding.json")).unwrap()).unwrap();
    assert_eq!(rel_rows.len(), 2);

    let results = dir.path().join("results");
    assert!(results.join("training_results.json").exists());
}

#[test]
fn test_export_module_directly() {
    let dir = TempDir::new().unwrap();
    let kg: Arc<dyn KnowledgeGraphStore> =
        Arc::new(KnowledgeGraph::from_ids(3, 1, vec![Triple::new(0, 0, 1), Triple::new(1, 0, 2)], vec![], vec![]).unwrap());
    let mut trainer = Trainer::new(TransE::new(2, 1.0, true), config(&dir), Arc::clone(&kg));
    trainer.build_model().unwrap();

    let out = export::export_embeddings(trainer.model(), kg.as_ref(), dir.path()).unwrap();
    assert_eq!(out, export::model_dir(dir.path(), "TransE"));
    assert_eq!(fs::read_to_string(out.join("ent_labels.tsv")).unwrap(), "e0\ne1\ne2\n");
}
