#![no_main]

use autobus_sync::protocol::{CallOutcome, ServerMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = serde_json::from_slice::<ServerMessage>(data) else {
        return;
    };

    // Call payloads are decoded a second time by the push adapter.
    if let ServerMessage::CallResult {
        result: CallOutcome::Ok(payload),
        ..
    } = message
    {
        let _ = serde_json::from_value::<autobus_sync::ActionReply>(payload.clone());
        let _ = serde_json::from_value::<autobus_sync::Snapshot>(payload);
    }
});
