use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [
        Ready, Fetched, HashChecked, Parsed, Chunked, Diffed, Embedded,
        Committed, Indexed, GraphSynced, EntitiesExtracted, Skipped, Failed
    ],
    events {
        fetch { transition: { from: Ready, to: Fetched } }
        check_hash { transition: { from: Fetched, to: HashChecked } }
        skip { transition: { from: HashChecked, to: Skipped } }
        parse { transition: { from: HashChecked, to: Parsed } }
        chunk { transition: { from: Parsed, to: Chunked } }
        diff { transition: { from: Chunked, to: Diffed } }
        embed { transition: { from: Diffed, to: Embedded } }
        commit { transition: { from: Embedded, to: Committed } }
        index { transition: { from: Committed, to: Indexed } }
        sync_graph { transition: { from: Indexed, to: GraphSynced } }
        extract_entities { transition: { from: GraphSynced, to: EntitiesExtracted } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Fetched, to: Failed }
            transition: { from: HashChecked, to: Failed }
            transition: { from: Parsed, to: Failed }
            transition: { from: Chunked, to: Failed }
            transition: { from: Diffed, to: Failed }
            transition: { from: Embedded, to: Failed }
            transition: { from: Committed, to: Failed }
            transition: { from: Indexed, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
