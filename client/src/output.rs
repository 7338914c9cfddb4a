use client::{ClientState, HaltReason, ReceivedEvent, SubscriptionState};
use colored::*;
use events::protocol::SubscriptionTarget;

pub fn print_event(event: &ReceivedEvent) {
    let version = event
        .payload
        .version
        .map(|v| format!(" v{v}"))
        .unwrap_or_default();

    println!(
        "\n[{}] {} {}{}",
        event.payload.resource.to_string().bright_blue().bold(),
        event.name.yellow(),
        event.payload.id,
        version.dimmed()
    );

    if let Ok(pretty) = serde_json::to_string_pretty(&event.payload.data) {
        println!("   {}", pretty.dimmed());
    }
}

pub fn print_state(state: ClientState) {
    let label = match state {
        ClientState::Connected => "connected".green().bold(),
        ClientState::Connecting => "connecting".yellow(),
        ClientState::Disconnected => "disconnected".red(),
        ClientState::Halted(HaltReason::Unauthorized) => {
            "halted: credentials rejected".red().bold()
        }
        ClientState::Halted(HaltReason::RetriesExhausted) => {
            "halted: reconnect attempts exhausted".red().bold()
        }
    };
    println!("{} {}", "→".blue(), label);
}

pub fn print_subscriptions(subscriptions: &[(SubscriptionTarget, SubscriptionState)]) {
    println!("\n{}", "=== SUBSCRIPTIONS ===".bright_white().bold());
    for (target, state) in subscriptions {
        let status = match state {
            SubscriptionState::Confirmed => "CONFIRMED".green().bold(),
            SubscriptionState::Pending => "PENDING".yellow(),
            SubscriptionState::Unsent => "UNSENT".dimmed(),
        };
        println!("[{}] {}", status, target);
    }
}
