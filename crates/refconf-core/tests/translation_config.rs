//! Integration tests resolving a complete translation experiment.
//!
//! The document below wires datasets, vocabularies, an encoder/decoder pair,
//! a trainer and a runner together the way a training run is configured.

use pretty_assertions::assert_eq;
use refconf_core::{
    Config, ConfigOptions, Document, ErrorKind, Pipeline, RuntimeTokens, Schema, Stage, Value,
};

const EXPERIMENT: &str = r#"
; Translation experiment, English to German
[vars]
prefix="exp-translation"
rnn_size=256
drop_keep_p=0.5
data_dir="data/en-de"

[main]
name="translation {drop_keep_p:.2f}"
output="out/{prefix}-{TIME}"
batch_size=64
epochs=10
train_dataset=<train_data>
val_dataset=<val_data>
trainer=<trainer>
runners=[<runner>]
evaluation=[("target", evaluators.BLEU),
            ("target", evaluators.TER),
           ]
logging_period=20
overwrite_output_dir=True

[train_data]
class=dataset.load_dataset_from_files
s_source="{data_dir}/train.en"
s_target="{data_dir}/train.de"
lazy=True

[val_data]
class=dataset.load_dataset_from_files
s_source="{data_dir}/val.en"
s_target="{data_dir}/val.de"

[source_vocabulary]
class=vocabulary.from_dataset
datasets=[<train_data>]
series_ids=["source"]
max_size=5000

[target_vocabulary]
class=vocabulary.from_dataset
datasets=[<train_data>]
series_ids=["target"]
max_size=5000

[encoder]
class=encoders.SentenceEncoder
rnn_size=$rnn_size
dropout_keep_prob=$drop_keep_p
data_id="source"
vocabulary=<source_vocabulary>
name="encoder_{rnn_size}"

[decoder]
class=decoders.Decoder
encoders=[<encoder>]
rnn_size=$rnn_size
dropout_keep_prob=$drop_keep_p
data_id="target"
vocabulary=<target_vocabulary>
max_output_len=(50,)

[trainer]
class=trainers.CrossEntropyTrainer
decoders=[<decoder>]
l2_weight=1.0e-8

[runner]
class=runners.GreedyRunner
decoder=<decoder>
output_series="series_target"
"#;

fn options() -> ConfigOptions {
    ConfigOptions::new()
        .with_runtime_tokens(RuntimeTokens::new().with("TIME", "2024-05-01-12-00-00"))
        .with_entry_point("main")
}

#[test]
fn test_full_experiment_resolves() {
    let config = Config::load_with_options(EXPERIMENT, options()).unwrap();

    assert_eq!(config.get_str("main.name").unwrap(), "translation 0.50");
    assert_eq!(
        config.get_str("main.output").unwrap(),
        "out/exp-translation-2024-05-01-12-00-00"
    );
    assert_eq!(
        config.get_str("main.train_dataset.s_source").unwrap(),
        "data/en-de/train.en"
    );
    assert_eq!(config.get_str("encoder.name").unwrap(), "encoder_256");
    assert_eq!(
        config.get_i64("main.runners[0].decoder.encoders[0].rnn_size").unwrap(),
        256
    );
    assert_eq!(
        config.get_f64("main.trainer.l2_weight").unwrap(),
        1.0e-8
    );
    assert!(config.get_bool("main.overwrite_output_dir").unwrap());
    assert!(config.unreachable_from("main").unwrap().is_empty());
}

#[test]
fn test_aliases_keep_their_type() {
    let config = Config::load_with_options(EXPERIMENT, options()).unwrap();

    assert_eq!(
        config.get("decoder.dropout_keep_prob").unwrap(),
        Value::Float(0.5)
    );
    assert_eq!(config.get("decoder.rnn_size").unwrap(), Value::Integer(256));
    assert_eq!(
        config.get("decoder.max_output_len").unwrap(),
        Value::Tuple(vec![Value::Integer(50)])
    );
}

#[test]
fn test_shared_sections_are_one_instance() {
    let config = Config::load_with_options(EXPERIMENT, options()).unwrap();

    let via_runner = config.get("main.runners[0].decoder").unwrap();
    let via_trainer = config.get("main.trainer.decoders[0]").unwrap();
    assert!(via_runner.same_instance(&via_trainer));

    let train_from_main = config.get("main.train_dataset").unwrap();
    let train_from_vocab = config.get("source_vocabulary.datasets[0]").unwrap();
    let train_from_target = config.get("target_vocabulary.datasets[0]").unwrap();
    assert!(train_from_main.same_instance(&train_from_vocab));
    assert!(train_from_vocab.same_instance(&train_from_target));
}

#[test]
fn test_classes_and_evaluators_pass_through() {
    let config = Config::load_with_options(EXPERIMENT, options()).unwrap();

    assert_eq!(
        config.section("encoder").unwrap().class(),
        Some("encoders.SentenceEncoder")
    );
    assert!(config.section("encoder").unwrap().get("class").is_none());
    assert_eq!(
        config.get("main.evaluation").unwrap(),
        Value::List(vec![
            Value::Tuple(vec![
                Value::String("target".into()),
                Value::Symbol("evaluators.BLEU".into())
            ]),
            Value::Tuple(vec![
                Value::String("target".into()),
                Value::Symbol("evaluators.TER".into())
            ]),
        ])
    );
}

#[test]
fn test_dependencies_resolve_first() {
    let config = Config::load_with_options(EXPERIMENT, options()).unwrap();
    let order = config.resolution_order();
    let position = |name: &str| order.iter().position(|n| n == name).unwrap();

    assert!(position("train_data") < position("source_vocabulary"));
    assert!(position("encoder") < position("decoder"));
    assert!(position("decoder") < position("trainer"));
    assert!(position("runner") < position("main"));
    assert_eq!(order.len(), config.len());
}

#[test]
fn test_reserialized_document_resolves_identically() {
    let document = Document::parse(EXPERIMENT).unwrap();
    let text = document.to_string();

    assert_eq!(Document::parse(&text).unwrap(), document);

    let original = Config::load_with_options(EXPERIMENT, options()).unwrap();
    let again = Config::load_with_options(&text, options()).unwrap();
    assert_eq!(original, again);
    assert_eq!(original.to_json().unwrap(), again.to_json().unwrap());
}

#[test]
fn test_missing_section_reference() {
    let source = EXPERIMENT.replace("trainer=<trainer>", "trainer=<missing_section>");
    let err = Config::load_with_options(&source, options()).unwrap_err();

    assert_eq!(
        err.kind,
        ErrorKind::UnknownReference {
            name: "missing_section".into()
        }
    );
    assert_eq!(err.path, Some("main.trainer".into()));
    assert!(err.to_string().contains("Line: 16"));
}

#[test]
fn test_cycle_is_reported_with_both_sections() {
    let source = EXPERIMENT.replace(
        "output_series=\"series_target\"",
        "output_series=\"series_target\"\nmain=<main>",
    );
    let err = Config::load_with_options(&source, options()).unwrap_err();

    let ErrorKind::Cycle { members } = &err.kind else {
        panic!("expected a cycle, got {}", err);
    };
    assert!(members.contains(&"main".to_string()));
    assert!(members.contains(&"runner".to_string()));
    assert_eq!(members.first(), members.last());
}

#[test]
fn test_missing_runtime_token() {
    let err = Config::load(EXPERIMENT).unwrap_err();

    assert_eq!(err.kind, ErrorKind::UnknownVariable { name: "TIME".into() });
    assert_eq!(err.path, Some("main.output".into()));
}

#[test]
fn test_overrides_and_schema() {
    let schema = Schema::from_yaml(
        r#"
classes:
  trainers.CrossEntropyTrainer:
    keys:
      l2_weight: float
      decoders: {list: section}
  decoders.Decoder:
    keys:
      dropout_keep_prob: float
      rnn_size: integer
"#,
    )
    .unwrap();
    let options = options()
        .with_override("vars.drop_keep_p=1")
        .with_override("trainer.l2_weight=0")
        .with_schema(schema);

    let config = Config::load_with_options(EXPERIMENT, options).unwrap();

    assert_eq!(config.get("trainer.l2_weight").unwrap(), Value::Float(0.0));
    assert_eq!(
        config.get("main.trainer.decoders[0].dropout_keep_prob").unwrap(),
        Value::Float(1.0)
    );
    // Not governed by the schema, so the alias keeps the integer
    assert_eq!(
        config.get("encoder.dropout_keep_prob").unwrap(),
        Value::Integer(1)
    );
    assert!(config
        .get("main.runners[0].decoder")
        .unwrap()
        .same_instance(&config.get("decoder").unwrap()));
}

#[test]
fn test_pipeline_reports_stages() {
    let mut pipeline = Pipeline::new(EXPERIMENT, options());
    assert_eq!(pipeline.stage(), Stage::Unparsed);

    let sections = pipeline.parse().unwrap().len();
    assert_eq!(sections, 10);

    pipeline.resolve().unwrap();
    assert_eq!(pipeline.stage(), Stage::Resolved);
}
