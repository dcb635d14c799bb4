/**
 * EF00 Walkthrough
 *
 * Resolves a session for a temperature/humidity sensor, feeds it a captured
 * data report and sends a capability write through a simulated host binding
 * that only answers on endpoint 2.
 *
 * Run with `RUST_LOG=debug` to see every strategy the dispatcher tries.
 */
use futures_util::future::BoxFuture;
use serde_json::json;
use tuyadp::transport::{TransportError, TransportResult};
use tuyadp::{Catalog, ClusterTransport, DeviceSession, Dispatcher, DpType, Ef00Command};

struct MisplacedEndpoint;

impl ClusterTransport for MisplacedEndpoint {
    fn command<'a>(&'a self, endpoint: u8, command: Ef00Command, payload: &'a [u8]) -> BoxFuture<'a, TransportResult> {
        Box::pin(async move {
            if endpoint != 2 {
                return Err(TransportError::Rejected(format!("no EF00 cluster on endpoint {}", endpoint)));
            }
            println!(
                "[HOST] endpoint {} command 0x{:02X}: {}",
                endpoint,
                command.as_u8(),
                hex::encode(payload)
            );
            Ok(())
        })
    }
}

fn captured_report() -> tuyadp::Result<Vec<u8>> {
    let mut report = vec![0x00, 0x2A];
    report.extend(tuyadp::protocol::record(1, DpType::Value, &[0, 0, 0, 0xD7])?);
    report.extend(tuyadp::protocol::record(2, DpType::Value, &[0, 0, 0, 0x30])?);
    report.extend(tuyadp::protocol::record(9, DpType::Enum, &[1])?);
    Ok(report)
}

#[tokio::main]
async fn main() {
    env_logger::init();
    println!("--- tuyadp {} - EF00 walkthrough ---", tuyadp::version());

    // 1. Resolve the device from the clusters it exposes
    let clusters = [0x0000, 0x0001, 0x0402, 0x0405, 0xEF00];
    let session = match DeviceSession::resolve("th05z", &clusters, None, Catalog::builtin()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[ERROR] Resolution failed: {}", e);
            return;
        }
    };
    println!(
        "[STEP 1] Profile '{}' (score {:.2})",
        session.profile(),
        session.detection().score
    );

    // 2. Decode a report carrying three datapoints, one of them unmapped
    let report = match captured_report() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[ERROR] Could not build report: {}", e);
            return;
        }
    };
    match session.handle_report(&report) {
        Ok(events) => {
            for event in events {
                println!("[STEP 2] {}", json!(event));
            }
        }
        Err(e) => eprintln!("[ERROR] Report rejected: {}", e),
    }

    // 3. Write a capability; the primary endpoint refuses everything
    let dispatcher = Dispatcher::new();
    let transport = MisplacedEndpoint;
    match session.write(&dispatcher, &transport, "measure_battery", &json!(80)).await {
        Ok(()) => println!("[STEP 3] Delivered"),
        Err(e) => eprintln!("[ERROR] Write failed: {}", e),
    }

    // 4. Ask for a full status report
    match session.query(&dispatcher, &transport).await {
        Ok(()) => println!("[STEP 4] Data query sent"),
        Err(e) => eprintln!("[ERROR] Query failed: {}", e),
    }

    println!("[INFO] Stats: {:?}", dispatcher.stats());
}
