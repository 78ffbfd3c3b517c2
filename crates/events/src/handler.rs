/// Decide and evolve in one step, without persistence.
///
/// Runs `handle` and folds the resulting events back into `aggregate`. Used by
/// domain tests; production writes go through the infra command dispatcher,
/// which adds loading, optimistic concurrency and publication.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: stockflow_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
