use std::sync::Arc;
use std::thread;

use metarule::{Meta, Value};

const RULES: &str = r"
class=Invoice { label: Invoice; }
class=Invoice field=amount { label: Amount; editable: false; }
class=Invoice field=notes { label: Notes; }
class=Order field=total { label: Total; }
field=* { visible: true; }
";

fn meta() -> Arc<Meta> {
    Meta::builder()
        .property_scope("field")
        .notation("ui.rules", RULES)
        .build()
        .unwrap()
}

#[test]
fn contexts_share_meta_across_threads() {
    let meta = meta();
    let cases = [
        ("Invoice", "amount", "Amount"),
        ("Invoice", "notes", "Notes"),
        ("Order", "total", "Total"),
        ("Invoice", "amount", "Amount"),
    ];

    let mut handles = vec![];
    for (class, field, _) in cases {
        let meta = Arc::clone(&meta);
        handles.push(thread::spawn(move || {
            let mut ctx = meta.new_context();
            let mut labels = Vec::new();
            for _ in 0..50 {
                ctx.push();
                ctx.set("class", class).unwrap();
                ctx.push();
                ctx.set("field", field).unwrap();
                labels.push(ctx.property_for_key("label").unwrap());
                assert!(ctx.boolean_property_for_key("visible", false).unwrap());
                ctx.pop();
                ctx.pop();
            }
            labels
        }));
    }

    let results: Vec<Vec<Value>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for ((_, _, expected), labels) in cases.iter().zip(&results) {
        assert!(labels.iter().all(|label| *label == Value::from(*expected)));
    }
    // Every traversal after the first per path is replayed.
    let stats = meta.stats();
    assert!(stats.activation_hits > stats.activation_misses);
}

#[test]
fn reload_while_reading() {
    let meta = meta();
    let reader = {
        let meta = Arc::clone(&meta);
        thread::spawn(move || {
            for _ in 0..200 {
                let mut ctx = meta.new_context();
                ctx.set("class", "Invoice").unwrap();
                let label = ctx.property_for_key("label").unwrap();
                assert!(
                    label == Value::from("Invoice") || label == Value::from("Facture"),
                    "unexpected label {label}"
                );
            }
        })
    };
    for i in 0..20 {
        let label = if i % 2 == 0 { "Facture" } else { "Invoice" };
        meta.load_rules("ui.rules", &RULES.replace("label: Invoice;", &format!("label: {label};")))
            .unwrap();
    }
    reader.join().unwrap();

    let mut ctx = meta.new_context();
    ctx.set("class", "Invoice").unwrap();
    assert_eq!(ctx.property_for_key("label").unwrap(), Value::from("Invoice"));
}
