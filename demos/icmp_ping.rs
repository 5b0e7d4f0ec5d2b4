use multiping::{resolve_targets, Pinger, Resolver, SystemResolver};
use std::env;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut hosts: Vec<String> = env::args().skip(1).collect();
    if hosts.is_empty() {
        hosts = vec!["1.1.1.1".to_string(), "one.one.one.one".to_string(), "localhost".to_string()];
    }
    let resolved = resolve_targets(&SystemResolver, &hosts[..]);
    for failure in &resolved.failures {
        eprintln!("{}", failure);
    }

    let mut pinger = Pinger::new(resolved.addresses.clone());
    pinger.set_count(4);
    pinger.set_interval(Duration::from_millis(500));

    let session = match pinger.session() {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}", e);
            return;
        }
    };
    let mut outcomes = session.with_stats();
    for outcome in outcomes.by_ref() {
        match outcome {
            Ok(outcome) => {
                let name = resolved.name_of(&outcome.target()).unwrap_or_default();
                println!("[{}] {}", name, outcome);
            }
            Err(e) => {
                eprintln!("{}", e);
                return;
            }
        }
    }

    println!("--- statistics ---");
    for host in outcomes.stats().hosts() {
        let name = SystemResolver
            .reverse(&host.target)
            .unwrap_or_else(|| host.target.to_string());
        println!("{} ({})", name, host);
    }
}
