use futures::StreamExt;
use multiping::Pinger;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let targets = vec![
        IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
        IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
        IpAddr::V6(Ipv6Addr::new(0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1111)),
    ];
    let mut pinger = Pinger::new(targets);
    pinger.set_count(5);
    pinger.set_strict_interval(true);
    pinger.set_interval(Duration::from_millis(200));
    pinger.set_timeout(Duration::from_secs(2));

    let session = match pinger.session_async().await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}", e);
            return;
        }
    };
    let stream = session.into_stream();
    futures::pin_mut!(stream);
    while let Some(outcome) = stream.next().await {
        match outcome {
            Ok(outcome) => println!("{}", outcome),
            Err(e) => eprintln!("{}", e),
        }
    }
}
