#![cfg(feature = "binary-snapshot")]

use std::sync::Arc;

use metarule::serial::{DeserializeError, SerializeError};
use metarule::{Context, Meta, MetaObject, ObjectRef, Snapshot, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn meta() -> Arc<Meta> {
    Meta::builder()
        .property_scope("field")
        .mirror("type", "type")
        .notation(
            "ui.rules",
            r"
            class=Invoice field=amount { type: Money; label: Amount; }
            type=Money { component: CurrencyField; }
            class=Invoice layout=Inspect { editable: false; }
            ",
        )
        .build()
        .unwrap()
}

fn navigated(meta: &Arc<Meta>) -> Context {
    let mut ctx = meta.new_context();
    ctx.set("class", "Invoice").unwrap();
    ctx.push();
    ctx.set("layout", "Inspect").unwrap();
    ctx.set("field", "amount").unwrap();
    ctx
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn snapshot_survives_bytes() {
    let meta = meta();
    let mut ctx = navigated(&meta);
    let bytes = ctx.snapshot().to_bytes().unwrap();
    assert_eq!(&bytes[..4], b"MRSN");

    let snapshot = Snapshot::from_bytes(&bytes).unwrap();
    assert_eq!(snapshot, ctx.snapshot());

    let mut restored = snapshot.hydrate(&meta).unwrap();
    assert_eq!(restored.values(), ctx.values());
    assert_eq!(restored.frame_depth(), 1);
    assert_eq!(
        restored.property_for_key("component").unwrap(),
        Value::from("CurrencyField")
    );
    assert_eq!(
        restored.all_properties().unwrap(),
        ctx.all_properties().unwrap()
    );
}

#[test]
fn chained_values_are_rederived() {
    let meta = meta();
    let ctx = navigated(&meta);
    let snapshot = ctx.snapshot();
    assert!(snapshot.assignments().iter().all(|a| a.key != "type"));

    let restored = Snapshot::from_bytes(&snapshot.to_bytes().unwrap())
        .unwrap()
        .hydrate(&meta)
        .unwrap();
    assert_eq!(restored.values().get("type"), Some(&Value::from("Money")));
}

#[test]
fn structured_values_round_trip() {
    let meta = meta();
    let mut ctx = meta.new_context();
    ctx.set("tags", vec![Value::from("a"), Value::Int(2), Value::Float(1.5)])
        .unwrap();
    ctx.set("flag", false).unwrap();
    let bytes = ctx.snapshot().to_bytes().unwrap();
    let restored = Snapshot::from_bytes(&bytes).unwrap().hydrate(&meta).unwrap();
    assert_eq!(restored.values(), ctx.values());
}

#[test]
fn empty_snapshot_round_trips() {
    let bytes = Snapshot::default().to_bytes().unwrap();
    assert_eq!(Snapshot::from_bytes(&bytes).unwrap(), Snapshot::default());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Record;

impl MetaObject for Record {
    fn field(&self, _name: &str) -> Option<Value> {
        None
    }
}

#[test]
fn objects_cannot_be_persisted() {
    let meta = meta();
    let mut ctx = meta.new_context();
    ctx.set("object", ObjectRef::new(Record)).unwrap();
    assert!(matches!(
        ctx.snapshot().to_bytes(),
        Err(SerializeError::Unsupported { key, kind: "object" }) if key == "object"
    ));
}

#[test]
fn truncated_bytes_rejected() {
    let meta = meta();
    let bytes = navigated(&meta).snapshot().to_bytes().unwrap();
    assert!(Snapshot::from_bytes(&bytes[..10]).is_err());
    assert!(matches!(
        Snapshot::from_bytes(&bytes[..bytes.len() - 1]),
        Err(DeserializeError::LengthMismatch { .. })
    ));
}

#[test]
fn tampered_payload_rejected() {
    let meta = meta();
    let mut bytes = navigated(&meta).snapshot().to_bytes().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    assert!(matches!(
        Snapshot::from_bytes(&bytes),
        Err(DeserializeError::ChecksumMismatch)
    ));
}

#[test]
fn foreign_bytes_rejected() {
    let mut bytes = vec![0_u8; 64];
    bytes[..4].copy_from_slice(b"OORO");
    assert!(matches!(
        Snapshot::from_bytes(&bytes),
        Err(DeserializeError::BadMagic)
    ));
}
