use metarule::Meta;

fn main() {
    let text = std::fs::read_to_string("demos/invoice.rules").expect("failed to read rules");
    let meta = Meta::builder()
        .property_scope("class")
        .property_scope("field")
        .mirror("type", "type")
        .build()
        .expect("failed to build rule base");
    meta.load_rules("demos/invoice.rules", &text)
        .expect("failed to load rules");

    let mut ctx = meta.new_context();
    ctx.set("class", "Invoice").expect("set class");
    ctx.set("role", "clerk").expect("set role");

    for field in ["amount", "notes"] {
        ctx.push();
        ctx.set("field", field).expect("set field");
        println!("{field}:");
        print!("{}", ctx.debug_string());
        match ctx.explain() {
            Ok(report) => println!("{report}"),
            Err(e) => println!("explain failed: {e}"),
        }
        ctx.pop();
    }
}
