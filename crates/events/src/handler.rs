/// Execute an aggregate command in place (no IO, no persistence).
///
/// Decide with `handle`, then evolve with `apply` for every emitted event.
/// Used by domain tests and by seeding code that builds aggregates without an
/// event store; production paths go through the infra `CommandDispatcher`.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: bodega_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
