use std::{error::Error, time::Instant};

use gossip_mining_sim::prelude::*;
use log::LevelFilter;
use simple_logger::SimpleLogger;

const ALPHA: f64 = 0.35;

fn main() -> Result<(), Box<dyn Error>> {
    SimpleLogger::new().with_level(LevelFilter::Info).init()?;
    let start = Instant::now();

    let mut builder = SimulationBuilder::new()
        .iterations(200_000)
        .block_interval(600)
        .tx_model(TxModelKind::Null)
        .seed(2021);

    let regions = [Region::US, Region::GE, Region::CN, Region::RU];
    let honest_power = (1.0 - ALPHA) / regions.len() as f64;
    for region in regions {
        builder.add_node(NodeConfig::new(
            format!("honest-{}", region),
            honest_power,
            region,
        ));
    }
    let selfish = builder.add_node(
        NodeConfig::new("selfish", ALPHA, Region::US)
            .strategy(StrategyKind::Selfish),
    );
    builder.connect_all();

    let output = builder.build()?.run()?;

    // Every honest node has seen the same history by the end of a long run
    let Some(reference) = output.node(NodeId::from(1)) else {
        return Err("no honest node".into());
    };
    let longest = reference.blockchain().longest_chain(&TieBreaker::default());

    for node in &output.nodes {
        let chain = node.blockchain();
        let stale = chain.num_known().saturating_sub(
            chain.longest_chain(&TieBreaker::default()).len(),
        );
        let head = chain.best_head(&TieBreaker::default());
        println!(
            "{:<12} head {:<10} height {:>5}  stale {:>4}",
            node.name(),
            head.map(|b| b.id.to_string()).unwrap_or_default(),
            head.map(|b| b.height).unwrap_or_default(),
            stale,
        );
    }

    let mined = longest.iter().filter(|id| id.creator != NodeId::GENESIS).count();
    let by_selfish = longest.iter().filter(|id| id.creator == selfish).count();
    println!(
        "selfish share of the longest chain: {:.4} (mining power {})",
        by_selfish as f64 / mined.max(1) as f64,
        ALPHA
    );
    println!("Elapsed time: {:.4} secs", start.elapsed().as_secs_f64());

    Ok(())
}
