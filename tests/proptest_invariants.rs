
use metarule::{Context, Value};
use proptest::prelude::*;
use strategies::{
    arb_assignments, arb_chained_meta, arb_chained_ops, arb_ops, arb_rules, as_btree, build_meta,
    key_name, GenRule, Model, Op, KEYS, VALUES,
};

/// Helper: apply an op to a context, skipping pops with no open frame.
fn apply(ctx: &mut Context, op: Op) {
    match op {
        Op::Push => ctx.push(),
        Op::Pop if ctx.frame_depth() > 0 => ctx.pop(),
        Op::Pop => {}
        Op::Set(key, value) => ctx.set(key_name(key), VALUES[value]).unwrap(),
    }
}

fn run(rules: &[GenRule], ops: &[Op]) -> (Context, Model) {
    let meta = build_meta(rules);
    let mut ctx = meta.new_context();
    let mut model = Model::default();
    for &op in ops {
        if model.apply(op) {
            apply(&mut ctx, op);
        }
    }
    (ctx, model)
}

// ---------------------------------------------------------------------------
// Invariant 1: Reference semantics
//
// Properties equal the rank-ordered merge of every rule whose selectors all
// hold for the current values, whatever sequence of sets, overrides and
// frames produced them.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn properties_match_reference_model(rules in arb_rules(), ops in arb_ops()) {
        let (mut ctx, model) = run(&rules, &ops);
        let actual = as_btree(&ctx.all_properties().unwrap());
        prop_assert_eq!(actual, model.properties(&rules));
    }

    #[test]
    fn values_match_reference_model(rules in arb_rules(), ops in arb_ops()) {
        let (mut ctx, model) = run(&rules, &ops);
        for key in KEYS {
            prop_assert_eq!(ctx.value(key).unwrap(), Value::from(model.value(key)));
        }
    }
}

// ---------------------------------------------------------------------------
// Invariant 2: Push/pop idempotence
//
// Any sequence of assignments inside a frame is fully undone by its pop.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn pop_restores_previous_state(
        rules in arb_rules(),
        before in arb_ops(),
        inside in arb_ops(),
    ) {
        let (mut ctx, _) = run(&rules, &before);
        let values = ctx.values().clone();
        let properties = ctx.all_properties().unwrap();
        let debug = ctx.debug_string();
        let depth = ctx.frame_depth();

        ctx.push();
        for &op in &inside {
            if !matches!(op, Op::Pop) {
                apply(&mut ctx, op);
            }
        }
        ctx.pop();

        prop_assert_eq!(ctx.frame_depth(), depth);
        prop_assert_eq!(ctx.values(), &values);
        prop_assert_eq!(ctx.debug_string(), debug);
        prop_assert_eq!(ctx.all_properties().unwrap(), properties);
    }
}

// ---------------------------------------------------------------------------
// Invariant 3: Order independence
//
// Assigning the same distinct keys in any order yields the same properties.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn assignment_order_is_irrelevant(
        rules in arb_rules(),
        (ordered, shuffled) in arb_assignments()
            .prop_flat_map(|a| (Just(a.clone()), Just(a).prop_shuffle())),
    ) {
        let meta = build_meta(&rules);
        let mut first = meta.new_context();
        for &(k, v) in &ordered {
            first.set(KEYS[k], VALUES[v]).unwrap();
        }
        let mut second = meta.new_context();
        for &(k, v) in &shuffled {
            second.set(KEYS[k], VALUES[v]).unwrap();
        }
        prop_assert_eq!(
            as_btree(&first.all_properties().unwrap()),
            as_btree(&second.all_properties().unwrap())
        );
    }
}

// ---------------------------------------------------------------------------
// Invariant 4: Override correctness
//
// Overriding a key gives the same properties as a context that only ever
// saw the final value.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn override_equals_direct_assignment(
        rules in arb_rules(),
        assignments in arb_assignments(),
        pick in any::<prop::sample::Index>(),
        replacement in 0..VALUES.len(),
    ) {
        let meta = build_meta(&rules);
        let (key, _) = assignments[pick.index(assignments.len())];

        let mut overridden = meta.new_context();
        for &(k, v) in &assignments {
            overridden.set(KEYS[k], VALUES[v]).unwrap();
        }
        overridden.set(KEYS[key], VALUES[replacement]).unwrap();

        let mut direct = meta.new_context();
        for &(k, v) in &assignments {
            let v = if k == key { replacement } else { v };
            direct.set(KEYS[k], VALUES[v]).unwrap();
        }
        prop_assert_eq!(overridden.values(), direct.values());
        prop_assert_eq!(
            as_btree(&overridden.all_properties().unwrap()),
            as_btree(&direct.all_properties().unwrap())
        );
    }
}

// ---------------------------------------------------------------------------
// Invariant 5: Cache transparency
//
// A traversal replayed from a warm activation cache produces exactly what a
// cold rule base computes.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn warm_cache_equals_cold(rules in arb_rules(), ops in arb_ops()) {
        let meta = build_meta(&rules);
        let mut warm = meta.new_context();
        for &op in &ops {
            apply(&mut warm, op);
        }
        let _ = warm.all_properties().unwrap();

        let mut replay = meta.new_context();
        for &op in &ops {
            apply(&mut replay, op);
        }

        let (mut cold, _) = run(&rules, &ops);
        prop_assert_eq!(replay.values(), cold.values());
        prop_assert_eq!(
            as_btree(&replay.all_properties().unwrap()),
            as_btree(&cold.all_properties().unwrap())
        );
    }

    #[test]
    fn snapshot_hydrates_equivalent_context(rules in arb_rules(), ops in arb_ops()) {
        let (mut ctx, _) = run(&rules, &ops);
        let mut restored = ctx.snapshot().hydrate(ctx.meta()).unwrap();
        prop_assert_eq!(restored.values(), ctx.values());
        prop_assert_eq!(restored.frame_depth(), ctx.frame_depth());
        prop_assert_eq!(
            as_btree(&restored.all_properties().unwrap()),
            as_btree(&ctx.all_properties().unwrap())
        );
    }
}

// ---------------------------------------------------------------------------
// Invariant 6: Chaining under property scopes
//
// With scope keys and a mirrored property in play, a snapshot replays into
// the live state, and a pop still undoes everything inside its frame.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn snapshot_replay_equals_live_context(schema in arb_chained_meta(), ops in arb_chained_ops()) {
        let meta = schema.build();
        let mut ctx = meta.new_context();
        for &op in &ops {
            apply(&mut ctx, op);
        }
        let mut restored = ctx.snapshot().hydrate(&meta).unwrap();
        prop_assert_eq!(restored.values(), ctx.values());
        prop_assert_eq!(restored.frame_depth(), ctx.frame_depth());
        prop_assert_eq!(
            as_btree(&restored.all_properties().unwrap()),
            as_btree(&ctx.all_properties().unwrap())
        );
    }

    #[test]
    fn pop_restores_state_under_chaining(
        schema in arb_chained_meta(),
        before in arb_chained_ops(),
        inside in arb_chained_ops(),
    ) {
        let meta = schema.build();
        let mut ctx = meta.new_context();
        for &op in &before {
            apply(&mut ctx, op);
        }
        let values = ctx.values().clone();
        let properties = as_btree(&ctx.all_properties().unwrap());
        let depth = ctx.frame_depth();

        ctx.push();
        for &op in &inside {
            if !matches!(op, Op::Pop) {
                apply(&mut ctx, op);
            }
        }
        ctx.pop();

        prop_assert_eq!(ctx.frame_depth(), depth);
        prop_assert_eq!(ctx.values(), &values);
        prop_assert_eq!(as_btree(&ctx.all_properties().unwrap()), properties);
    }
}
