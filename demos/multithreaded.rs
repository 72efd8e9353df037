use std::sync::Arc;
use std::thread;

use metarule::Meta;

fn main() {
    let meta = Meta::builder()
        .property_scope("field")
        .rule(|r| r.select("field", "*").property("visible", true))
        .rule(|r| r.select("role", "guest").select("field", "salary").property("visible", false))
        .build()
        .expect("failed to build rule base");

    let handles: Vec<_> = ["admin", "guest", "clerk", "guest"]
        .into_iter()
        .enumerate()
        .map(|(i, role)| {
            let meta = Arc::clone(&meta);
            thread::spawn(move || {
                // Each thread owns its context; the rule base and its caches are shared
                let mut ctx = meta.new_context();
                ctx.set("role", role).expect("set role");
                ctx.set("field", "salary").expect("set field");
                let visible = ctx.boolean_property_for_key("visible", false);
                println!("Thread {i} ({role}): visible = {visible:?}");
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    println!("{:?}", meta.stats());
}
