use metarule::Meta;

fn main() {
    // Define rules
    let meta = Meta::builder()
        .property_scope("class")
        .property_scope("field")
        .rule(|r| r.select("class", "Invoice").property("label", "Invoice"))
        .rule(|r| {
            r.select("class", "Invoice")
                .select("field", "amount")
                .property("label", "Amount")
                .property("visible", true)
        })
        .rule(|r| r.select("field", "amount").property("format", "currency"))
        .build()
        .expect("failed to build rule base");

    println!("{} rules loaded", meta.rule_count());

    // Walk a context down to a field
    let mut ctx = meta.new_context();
    ctx.push();
    ctx.set("class", "Invoice").expect("set class");
    println!("class label: {}", ctx.property_for_key("label").expect("label"));

    ctx.push();
    ctx.set("field", "amount").expect("set field");
    for (name, value) in ctx.all_properties().expect("properties").iter() {
        println!("  {name}: {value}");
    }
    ctx.pop();

    println!("back to: {}", ctx.property_for_key("label").expect("label"));
    ctx.pop();
}
