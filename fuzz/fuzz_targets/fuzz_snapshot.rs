#![no_main]

use autobus_sync::notify::NotificationTranslator;
use autobus_sync::Snapshot;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(snapshot) = serde_json::from_slice::<Snapshot>(data) else {
        return;
    };

    // Derived views must never panic on arbitrary service output.
    let _ = snapshot.lifecycle();
    let _ = snapshot.newest_log_timestamp();
    let _ = snapshot.bus_player().map(|p| p.display_name().len());
    let mut translator = NotificationTranslator::new();
    let _ = translator.observe(&snapshot);
    let _ = translator.observe(&snapshot);
});
