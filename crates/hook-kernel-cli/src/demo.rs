use anyhow::{anyhow, Context as _, Result};
use hook_kernel_core::{
    activate, cascade, combine_hooks, compose_flat, compose_nested, execute, learn_delta,
    prioritize, refine, rollback, update_stats, Comparator, Condition, Context, Hook, HookSource, Operation, OperationRegistry, Outcome,
    Policy, Stats, Value,
};
use serde_json::Value as Json;

fn catalogue() -> Vec<Hook> {
    vec![
        Hook::new(
            "battery_saver",
            HookSource::Predefined,
            Condition::and([
                Condition::leaf("battery", Comparator::Lt, 30),
                Condition::not(Condition::eq("charging", true)),
            ]),
            vec![Operation::assign("charging", true)],
            Stats::new(0.9, 1.0),
        )
        .with_description("plug in when the battery runs low"),
        Hook::new(
            "dim_screen",
            HookSource::Predefined,
            Condition::and([Condition::eq("charging", true), Condition::eq("screen", "bright")]),
            vec![Operation::assign("screen", "dim")],
            Stats::new(0.8, 1.0),
        )
        .with_description("dim the screen while charging"),
    ]
}

fn start_context() -> Context {
    Context::from_iter([
        ("battery", Value::from(20)),
        ("charging", false.into()),
        ("screen", "bright".into()),
    ])
}

/// Walk the battery-saver scenario through selection, execution, rollback,
/// every composition combinator, scoring, cascading and learning, reporting
/// each intermediate value.
pub(crate) fn run(registry: &OperationRegistry) -> Result<Json> {
    let policy = Policy::default();
    let hooks = catalogue();
    let context = start_context();

    let activated = activate(&hooks, &context);
    let selected =
        prioritize(&activated, &policy).ok_or_else(|| anyhow!("demo catalogue did not activate"))?;
    let execution = execute(selected, &context, registry).context("demo execution failed")?;
    let restored =
        rollback(&execution.plan, &execution.context, registry).context("demo rollback failed")?;

    let refined = refine(selected, &Condition::eq("location", "home"))
        .context("demo refinement failed")?;
    let nested = compose_nested(&hooks[0], &hooks[1], registry);
    let flattened = compose_flat(&Hook {
        action: vec![Operation::sequence(nested.action.clone())],
        ..nested.clone()
    });
    let combined = combine_hooks(&hooks, &policy).context("demo combination failed")?;
    let reordered = Condition::and([
        Condition::not(Condition::eq("charging", true)),
        Condition::leaf("battery", Comparator::Lt, 30),
    ]);
    let rewarded = update_stats(selected, Outcome::Success, &policy);
    let trace = cascade(hooks.as_slice(), &context, &policy, registry).context("demo cascade failed")?;
    let learned = learn_delta(&context, &trace.final_context, &[], &policy, registry)
        .context("demo learning failed")?;

    Ok(serde_json::json!({
        "scenario": "battery_saver",
        "context": context,
        "activated": activated.iter().map(|hook| hook.metadata.id.as_str()).collect::<Vec<_>>(),
        "selected": selected.metadata.id,
        "execution": execution,
        "restored_matches": restored == context,
        "refined": refined,
        "nested": nested,
        "flattened": flattened,
        "combined": combined,
        "reordered_equivalent": selected.condition.equivalent(&reordered),
        "rewarded_score": rewarded.stats.success_score,
        "cascade": trace,
        "learned": learned,
    }))
}
