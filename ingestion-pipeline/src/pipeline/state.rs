use state_machines::state_machine;

state_machine! {
    name: ProcessingMachine,
    state: ProcessingStage,
    initial: Ready,
    states: [Ready, Extracted, Chunked, Embedded, Persisted, Indexed, Failed],
    events {
        extract { transition: { from: Ready, to: Extracted } }
        chunk { transition: { from: Extracted, to: Chunked } }
        embed { transition: { from: Chunked, to: Embedded } }
        persist { transition: { from: Embedded, to: Persisted } }
        index { transition: { from: Persisted, to: Indexed } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Chunked, to: Failed }
            transition: { from: Embedded, to: Failed }
            transition: { from: Persisted, to: Failed }
            transition: { from: Indexed, to: Failed }
        }
    }
}

pub fn ready() -> ProcessingMachine<(), Ready> {
    ProcessingMachine::new(())
}
