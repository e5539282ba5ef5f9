//! Property tests for detokenization against an echoing stub service.
//!
//! The stub answers every `{policyName, marker: value}` item with
//! `{policyName, marker: value}`, so detokenizing an encoded record must give
//! back the record with its encoding stripped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

use data_protection::{
    GatewayError, Operation, ProtectionConfig, ProtectionEngine, ProtectionGateway,
};

const POLICIES: [&str; 5] = ["firstName", "lastName", "DOB", "SSN", "OtherID"];

#[derive(Default)]
struct EchoGateway {
    calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

#[async_trait]
impl ProtectionGateway for EchoGateway {
    async fn send(
        &self,
        _operation: Operation,
        payload: &[Value],
    ) -> Result<Option<Vec<Value>>, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(payload.len());
        Ok(Some(payload.to_vec()))
    }
}

/// One field of a generated record: its encoded and expected clean forms.
#[derive(Debug, Clone)]
enum Field {
    Plain(String),
    Encoded { plaintext: String, policy: &'static str },
    Group { values: Vec<String>, policy: &'static str },
    Nested(Vec<(String, Field)>),
}

impl Field {
    fn encoded(&self) -> Value {
        match self {
            Field::Plain(text) => json!(text),
            Field::Encoded { plaintext, policy } => json!(format!("{}$${}", plaintext, policy)),
            Field::Group { values, policy } => {
                let mut list: Vec<Value> = values.iter().map(|v| json!(v)).collect();
                list.push(json!(policy));
                Value::Array(list)
            }
            Field::Nested(fields) => object(fields, Field::encoded),
        }
    }

    fn clean(&self) -> Value {
        match self {
            Field::Plain(text) => json!(text),
            Field::Encoded { plaintext, .. } => json!(plaintext),
            Field::Group { values, .. } => json!(values),
            Field::Nested(fields) => object(fields, Field::clean),
        }
    }

    fn encoded_count(&self) -> usize {
        match self {
            Field::Plain(_) => 0,
            Field::Encoded { .. } => 1,
            Field::Group { values, .. } => values.len(),
            Field::Nested(fields) => fields.iter().map(|(_, f)| f.encoded_count()).sum(),
        }
    }
}

fn object(fields: &[(String, Field)], render: fn(&Field) -> Value) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .map(|(key, field)| (key.clone(), render(field)))
        .collect();
    Value::Object(map)
}

fn text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 '\"\\\\]{0,12}"
}

fn policy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(POLICIES.to_vec())
}

fn field() -> impl Strategy<Value = Field> {
    let leaf = prop_oneof![
        text().prop_map(Field::Plain),
        (text(), policy()).prop_map(|(plaintext, policy)| Field::Encoded { plaintext, policy }),
        (prop::collection::vec(text(), 0..4), policy())
            .prop_map(|(values, policy)| Field::Group { values, policy }),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop::collection::btree_map("[a-z]{1,6}", inner, 1..4)
            .prop_map(|fields| Field::Nested(fields.into_iter().collect()))
    })
}

fn records() -> impl Strategy<Value = Vec<Vec<(String, Field)>>> {
    prop::collection::vec(
        prop::collection::btree_map("[a-z]{1,6}", field(), 0..5)
            .prop_map(|fields| fields.into_iter().collect::<Vec<_>>()),
        1..6,
    )
}

fn run<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn detokenize_strips_every_encoding(rows in records(), batch_size in 1usize..8) {
        let encoded = Value::Array(rows.iter().map(|r| object(r, Field::encoded)).collect());
        let clean = Value::Array(rows.iter().map(|r| object(r, Field::clean)).collect());
        let expected_values: usize = rows
            .iter()
            .flat_map(|r| r.iter().map(|(_, f)| f.encoded_count()))
            .sum();

        let mut config = ProtectionConfig::default();
        config.batching.batch_size = batch_size;
        let gateway = Arc::new(EchoGateway::default());
        let engine = ProtectionEngine::with_gateway(config, gateway.clone()).unwrap();

        let result = run(engine.detokenize(&encoded)).unwrap();
        prop_assert_eq!(result, clean);

        let sizes = gateway.batch_sizes.lock().unwrap().clone();
        prop_assert_eq!(sizes.iter().sum::<usize>(), expected_values);
        prop_assert_eq!(sizes.len(), expected_values.div_ceil(batch_size));
        prop_assert!(sizes.iter().all(|&size| size <= batch_size));
    }

    #[test]
    fn plain_records_never_reach_the_service(rows in prop::collection::vec(
        prop::collection::btree_map("[a-z]{1,6}", text(), 0..5), 0..5)
    ) {
        let records = json!(rows);
        let gateway = Arc::new(EchoGateway::default());
        let engine =
            ProtectionEngine::with_gateway(ProtectionConfig::default(), gateway.clone()).unwrap();

        let result = run(engine.detokenize(&records)).unwrap();
        prop_assert_eq!(result, records);
        prop_assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }
}
