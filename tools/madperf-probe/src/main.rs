// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! madperf-probe - SMP query latency benchmark tool
//!
//! Keeps N subnet management queries in flight against one target for a
//! fixed run time and reports latency and throughput.

use clap::Parser;
use colored::*;
use madperf::protocol::SMP_DATA_SIZE;
use madperf::{
    ConfigError, MgmtClass, PipelineEngine, RunConfig, RunReport, SimTransport, SmpPacket,
    Transport,
};
use std::fmt::{self, Write as _};
use std::path::PathBuf;

/// SMP latency benchmark tool
#[derive(Parser, Debug)]
#[command(name = "madperf-probe")]
#[command(version = "0.1.0")]
#[command(about = "Measure pipelined SMP query latency")]
struct Args {
    /// Destination LID, or directed-route path ("0,1,2") with -D
    target: Option<String>,

    /// Attribute id (decimal or 0x hex)
    attr: Option<String>,

    /// Attribute modifier (decimal or 0x hex)
    attr_mod: Option<String>,

    /// Use directed-route SMPs
    #[arg(short = 'D', long, conflicts_with = "lid_routed")]
    directed: bool,

    /// Use LID-routed SMPs (default)
    #[arg(short = 'L', long)]
    lid_routed: bool,

    /// SMP method: 1 = Get, 2 = Set
    #[arg(short, long)]
    method: Option<u8>,

    /// Requests kept in flight
    #[arg(short = 'N', long)]
    queue_depth: Option<usize>,

    /// Run time in seconds
    #[arg(short = 't', long)]
    run_time: Option<u64>,

    /// Transport retries per request
    #[arg(short, long)]
    retries: Option<u32>,

    /// Transport timeout in milliseconds
    #[arg(short = 'T', long)]
    timeout: Option<u32>,

    /// Print the reply payload as a string
    #[arg(short, long)]
    string: bool,

    /// HCA device name
    #[arg(short = 'C', long)]
    device: Option<String>,

    /// HCA port number
    #[arg(short = 'P', long)]
    port: Option<u8>,

    /// Use the in-process simulated responder
    #[arg(long)]
    sim: bool,

    /// Simulated reply delay in microseconds
    #[arg(long)]
    sim_delay_us: Option<u64>,

    /// Simulated request loss probability (0.0 - 1.0)
    #[arg(long)]
    sim_loss: Option<f64>,

    /// Simulated reply payload
    #[arg(long)]
    sim_payload: Option<String>,

    /// Output JSON results
    #[arg(long)]
    json: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Load run settings from a TOML file; command-line values win
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    if let Err(e) = run(&args) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(args)?;
    config.validate()?;

    let query = config.query()?;
    let settings = config.engine_settings();

    let transport = open_transport(&config)?;
    let endpoint = transport.describe();
    log::info!("using {}", endpoint);

    let mut engine = PipelineEngine::new(transport, query, settings)?;
    let result = engine.run();
    let mut transport = engine.into_transport();
    transport.close();
    let report = result?;

    if args.json {
        println!("{}", json_report(&config, &endpoint, &report));
    } else {
        let mut out = String::new();
        write_report(&mut out, &config, &endpoint, &report)?;
        print!("{}", out);
    }
    Ok(())
}

/// Merge the optional config file with command-line values.
fn build_config(args: &Args) -> Result<RunConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };

    if args.directed {
        config.mgmt_class = MgmtClass::DirectedRoute;
    } else if args.lid_routed {
        config.mgmt_class = MgmtClass::LidRouted;
    }
    if let Some(target) = &args.target {
        config.target = target.clone();
    }
    if let Some(attr) = &args.attr {
        config.attr_id = Some(madperf::config::parse_int(attr)?);
    }
    if let Some(attr_mod) = &args.attr_mod {
        config.attr_mod = madperf::config::parse_int(attr_mod)?;
    }
    if let Some(method) = args.method {
        config.method = method;
    }
    if let Some(depth) = args.queue_depth {
        config.queue_depth = depth;
    }
    if let Some(secs) = args.run_time {
        config.run_time_secs = secs;
    }
    if let Some(retries) = args.retries {
        config.retries = retries;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    if let Some(device) = &args.device {
        config.device = Some(device.clone());
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.string_output |= args.string;

    config.sim.enabled |= args.sim;
    if let Some(delay) = args.sim_delay_us {
        config.sim.delay_us = delay;
    }
    if let Some(loss) = args.sim_loss {
        config.sim.loss = loss;
    }
    if let Some(payload) = &args.sim_payload {
        config.sim.payload = Some(payload.clone());
    }

    Ok(config)
}

fn open_transport(config: &RunConfig) -> Result<Box<dyn Transport>, Box<dyn std::error::Error>> {
    if config.sim.enabled {
        return Ok(Box::new(SimTransport::new(config.sim_config())));
    }

    #[cfg(target_os = "linux")]
    {
        let umad = madperf::UmadTransport::open(config.device.as_deref(), config.port)?;
        Ok(Box::new(umad))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err("umad devices are only available on Linux; use --sim".into())
    }
}

fn fmt_latency(value: Option<u64>) -> String {
    match value {
        Some(us) => format!("{} us", us),
        None => "n/a".to_string(),
    }
}

fn write_report<W: fmt::Write>(
    out: &mut W,
    config: &RunConfig,
    endpoint: &str,
    report: &RunReport,
) -> fmt::Result {
    let stats = &report.stats;
    let have_samples = stats.received_total > 0;

    writeln!(out)?;
    writeln!(out, "{}", "=== SMP Latency Results ===".bold())?;
    writeln!(out)?;
    writeln!(out, "  {} {}", "Endpoint:".cyan(), endpoint)?;
    writeln!(
        out,
        "  {} {} ms x {} retries",
        "Timeout:".cyan(),
        config.timeout_ms,
        config.retries
    )?;
    writeln!(out, "  {} {}", "Class:".cyan(), config.mgmt_class)?;
    writeln!(out, "  {} {}", "Target:".cyan(), config.target)?;
    writeln!(out, "  {} {}", "Method:".cyan(), config.method)?;
    writeln!(out, "  {} {}", "Queue depth:".cyan(), config.queue_depth)?;
    writeln!(
        out,
        "  {} {}s ({:.3}s measured)",
        "Run time:".cyan(),
        config.run_time_secs,
        report.elapsed.as_secs_f64()
    )?;
    writeln!(out)?;
    writeln!(out, "{}", "--- Traffic ---".dimmed())?;
    writeln!(
        out,
        "  {} {} sent, {} received",
        "Bytes:".cyan(),
        stats.sent_bytes,
        stats.received_bytes
    )?;
    writeln!(
        out,
        "  {} {} sent, {} received, {} timeouts",
        "MADs:".cyan(),
        stats.sent_total,
        stats.received_total,
        stats.timeout_total
    )?;
    writeln!(out)?;
    writeln!(out, "{}", "--- Latency ---".dimmed())?;
    writeln!(
        out,
        "  {} {}",
        "Min:".green(),
        fmt_latency(have_samples.then_some(stats.min_us))
    )?;
    writeln!(
        out,
        "  {} {}",
        "Max:".red(),
        fmt_latency(have_samples.then_some(stats.max_us))
    )?;
    writeln!(out, "  {} {}", "Avg:".yellow(), fmt_latency(stats.avg_us()))?;
    writeln!(out)?;
    writeln!(
        out,
        "  {} {:.1} MiB/s",
        "Send BW:".cyan(),
        stats.send_bandwidth_mbps(report.elapsed)
    )?;
    writeln!(
        out,
        "  {} {:.1} MADs/s",
        "Send rate:".cyan(),
        stats.send_rate(report.elapsed)
    )?;

    if let Some(reply) = &report.last_reply {
        writeln!(out)?;
        if config.string_output {
            writeln!(out, "{}", payload_string(reply))?;
        } else {
            write_hexdump(out, &reply.data)?;
        }
        if let Some(status) = status_line(reply) {
            writeln!(out, "{}", status.yellow())?;
        }
    }
    Ok(())
}

fn json_report(config: &RunConfig, endpoint: &str, report: &RunReport) -> serde_json::Value {
    let payload = report.last_reply.as_ref().map(|reply| {
        if config.string_output {
            serde_json::Value::String(payload_string(reply))
        } else {
            serde_json::Value::String(reply.data.iter().map(|b| format!("{:02x}", b)).collect())
        }
    });

    serde_json::json!({
        "endpoint": endpoint,
        "class": config.mgmt_class,
        "target": config.target,
        "method": config.method,
        "attr_id": config.attr_id,
        "attr_mod": config.attr_mod,
        "queue_depth": config.queue_depth,
        "timeout_ms": config.timeout_ms,
        "retries": config.retries,
        "run_time_secs": config.run_time_secs,
        "elapsed_secs": report.elapsed.as_secs_f64(),
        "stats": report.stats,
        "avg_us": report.stats.avg_us(),
        "send_bw_mibps": report.stats.send_bandwidth_mbps(report.elapsed),
        "send_rate": report.stats.send_rate(report.elapsed),
        "payload": payload,
        "status": report.last_reply.as_ref().map(SmpPacket::status_code),
    })
}

/// Data region up to the first NUL, lossy UTF-8.
fn payload_string(reply: &SmpPacket) -> String {
    let end = reply
        .data
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(SMP_DATA_SIZE);
    String::from_utf8_lossy(&reply.data[..end]).into_owned()
}

fn status_line(reply: &SmpPacket) -> Option<String> {
    match reply.status_code() {
        0 => None,
        code => Some(format!("SMP status: 0x{:04x}", code)),
    }
}

/// Offset, 16 hex bytes and ASCII per line.
fn write_hexdump<W: fmt::Write>(out: &mut W, data: &[u8]) -> fmt::Result {
    for (line, chunk) in data.chunks(16).enumerate() {
        write!(out, "{:04x}: ", line * 16)?;
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => write!(out, "{:02x} ", b)?,
                None => out.write_str("   ")?,
            }
        }
        out.write_char(' ')?;
        for &b in chunk {
            out.write_char(if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            })?;
        }
        out.write_char('\n')?;
    }
    Ok(())
}
