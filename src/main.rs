mod config;

use anyhow::Context;
use base64::Engine;
use clap::{Parser, Subcommand, ValueEnum};
use lora_crypto::{cipher, keys, mic, AesKey, Direction, JoinAccept, JoinRequest, SessionKeys};
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lora-crypto")]
#[command(about = "LoRaWAN link-layer crypto: block transform, MIC and session keys")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Encoding of data arguments and printed bytes
    #[arg(long, value_enum, default_value_t = Encoding::Hex, global = true)]
    encoding: Encoding,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Encoding {
    Hex,
    Base64,
}

impl Encoding {
    fn decode(self, input: &str) -> anyhow::Result<Vec<u8>> {
        match self {
            Encoding::Hex => hex::decode(input.trim())
                .map_err(|e| anyhow::anyhow!("Hex decode error: {}", e)),
            Encoding::Base64 => base64::engine::general_purpose::STANDARD
                .decode(input.trim())
                .map_err(|e| anyhow::anyhow!("Base64 decode error: {}", e)),
        }
    }

    fn encode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Hex => hex::encode(bytes),
            Encoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Encrypt a buffer block by block (defaults to the configured AppSKey)
    Encrypt {
        #[arg(short, long)]
        key: Option<AesKey>,
        data: String,
    },
    /// Decrypt a buffer block by block (defaults to the configured AppSKey)
    Decrypt {
        #[arg(short, long)]
        key: Option<AesKey>,
        data: String,
    },
    /// Compute the MIC of a data message (defaults to the configured NwkSKey)
    Mic {
        #[arg(short, long)]
        key: Option<AesKey>,
        /// Device address in hex
        #[arg(long, value_parser = parse_hex_u32)]
        dev_addr: Option<u32>,
        #[arg(long)]
        fcnt: u32,
        /// Compute a downlink MIC instead of an uplink one
        #[arg(long)]
        downlink: bool,
        data: String,
    },
    /// Compute a CMAC MIC with no B0 block (join frames)
    Cmac {
        #[arg(short, long)]
        key: Option<AesKey>,
        data: String,
    },
    /// Derive NwkSKey and AppSKey from join parameters
    Derive {
        #[arg(long)]
        app_key: Option<AesKey>,
        #[arg(long, value_parser = parse_hex_u32)]
        app_nonce: u32,
        #[arg(long, value_parser = parse_hex_u32)]
        net_id: u32,
        #[arg(long, value_parser = parse_hex_u16)]
        dev_nonce: u16,
    },
    /// Parse and verify a join-request frame
    JoinRequest {
        #[arg(long)]
        app_key: Option<AesKey>,
        frame: String,
    },
    /// Build an encrypted join-accept frame
    JoinAccept {
        #[arg(long)]
        app_key: Option<AesKey>,
        #[arg(long, value_parser = parse_hex_u32)]
        app_nonce: u32,
        #[arg(long, value_parser = parse_hex_u32)]
        net_id: u32,
        #[arg(long, value_parser = parse_hex_u32)]
        dev_addr: Option<u32>,
        #[arg(long, default_value_t = 0x08)]
        dl_settings: u8,
        #[arg(long, default_value_t = 1)]
        rx_delay: u8,
        /// 16-byte CFList in hex
        #[arg(long)]
        cf_list: Option<String>,
    },
    /// Decrypt and verify a join-accept frame
    OpenJoinAccept {
        #[arg(long)]
        app_key: Option<AesKey>,
        /// Derive session keys with this DevNonce (hex)
        #[arg(long, value_parser = parse_hex_u16)]
        dev_nonce: Option<u16>,
        frame: String,
    },
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value '{}': {}", s, e))
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let value = parse_hex_u32(s)?;
    u16::try_from(value).map_err(|_| format!("'{}' does not fit in 16 bits", s))
}

fn require_key(arg: Option<AesKey>, fallback: Option<AesKey>, name: &str) -> anyhow::Result<AesKey> {
    arg.or(fallback).ok_or_else(|| {
        anyhow::anyhow!(
            "No {} given: pass it on the command line or set it under [device] in the config",
            name
        )
    })
}

fn require_dev_addr(arg: Option<u32>, fallback: Option<&str>) -> anyhow::Result<u32> {
    match (arg, fallback) {
        (Some(addr), _) => Ok(addr),
        (None, Some(addr_hex)) => parse_hex_u32(addr_hex)
            .map_err(|e| anyhow::anyhow!("Invalid dev_addr in config: {}", e)),
        (None, None) => Err(anyhow::anyhow!(
            "No DevAddr given: pass --dev-addr or set dev_addr under [device] in the config"
        )),
    }
}

fn emit(json_output: bool, text: String, value: serde_json::Value) -> anyhow::Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", text);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = config::Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config from {:?}: {}", cli.config, e);
        eprintln!("Using default configuration");
        config::Config::default()
    });

    // Logs go to stderr so stdout carries only results
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    debug!("lora-crypto v{}", env!("CARGO_PKG_VERSION"));

    let device = config.device();
    let enc = cli.encoding;

    match cli.command {
        Command::Encrypt { key, data } => {
            let key = require_key(key, device.app_s_key, "key")?;
            let input = enc.decode(&data)?;
            let out = cipher::encrypt(&input, &key).context("Encryption failed")?;
            info!("Encrypted {} bytes into {} bytes", input.len(), out.len());
            let encoded = enc.encode(&out);
            emit(cli.json, encoded.clone(), json!({ "data": encoded, "len": out.len() }))?;
        }
        Command::Decrypt { key, data } => {
            let key = require_key(key, device.app_s_key, "key")?;
            let input = enc.decode(&data)?;
            let out = cipher::decrypt(&input, &key).context("Decryption failed")?;
            info!("Decrypted {} bytes", input.len());
            let encoded = enc.encode(&out);
            emit(cli.json, encoded.clone(), json!({ "data": encoded, "len": out.len() }))?;
        }
        Command::Mic {
            key,
            dev_addr,
            fcnt,
            downlink,
            data,
        } => {
            let key = require_key(key, device.nwk_s_key, "NwkSKey")?;
            let dev_addr = require_dev_addr(dev_addr, device.dev_addr.as_deref())?;
            let direction = if downlink {
                Direction::Downlink
            } else {
                Direction::Uplink
            };
            let msg = enc.decode(&data)?;
            if msg.len() > 255 {
                info!(
                    "Message is {} bytes; B0 only carries the low length byte",
                    msg.len()
                );
            }

            let mic = mic::compute_mic(&msg, &key, dev_addr, direction, fcnt)
                .context("MIC computation failed")?;
            emit(
                cli.json,
                format!("{:08X}", mic),
                json!({
                    "mic": format!("{:08X}", mic),
                    "dev-addr": format!("{:08X}", dev_addr),
                    "fcnt": fcnt,
                    "direction": direction.to_string(),
                }),
            )?;
        }
        Command::Cmac { key, data } => {
            let key = require_key(key, device.app_key, "AppKey")?;
            let msg = enc.decode(&data)?;
            let mic = mic::compute_cmac_mic(&msg, &key).context("CMAC failed")?;
            emit(
                cli.json,
                format!("{:08X}", mic),
                json!({ "mic": format!("{:08X}", mic) }),
            )?;
        }
        Command::Derive {
            app_key,
            app_nonce,
            net_id,
            dev_nonce,
        } => {
            let app_key = require_key(app_key, device.app_key, "AppKey")?;
            let nwk_s_key = keys::derive_nwk_s_key(&app_key, app_nonce, net_id, dev_nonce)
                .context("NwkSKey derivation failed")?;
            let app_s_key = keys::derive_app_s_key(&app_key, app_nonce, net_id, dev_nonce)
                .context("AppSKey derivation failed")?;
            emit(
                cli.json,
                format!("NwkSKey={}\nAppSKey={}", nwk_s_key, app_s_key),
                json!({
                    "nwk-s-key": nwk_s_key.to_string(),
                    "app-s-key": app_s_key.to_string(),
                }),
            )?;
        }
        Command::JoinRequest { app_key, frame } => {
            let app_key = require_key(app_key, device.app_key, "AppKey")?;
            let bytes = enc.decode(&frame)?;
            let request = JoinRequest::parse(&bytes).context("Malformed join-request")?;
            request
                .verify(&app_key)
                .context("Join-request failed verification")?;
            debug!(
                "JoinRequest verified: DevEUI={:016X} DevNonce={:04X}",
                request.dev_eui, request.dev_nonce
            );
            emit(
                cli.json,
                format!(
                    "AppEUI={:016X} DevEUI={:016X} DevNonce={:04X} MIC={:08X}",
                    request.app_eui, request.dev_eui, request.dev_nonce, request.mic
                ),
                json!({
                    "app-eui": format!("{:016X}", request.app_eui),
                    "dev-eui": format!("{:016X}", request.dev_eui),
                    "dev-nonce": format!("{:04X}", request.dev_nonce),
                    "mic": format!("{:08X}", request.mic),
                }),
            )?;
        }
        Command::JoinAccept {
            app_key,
            app_nonce,
            net_id,
            dev_addr,
            dl_settings,
            rx_delay,
            cf_list,
        } => {
            let app_key = require_key(app_key, device.app_key, "AppKey")?;
            let dev_addr = require_dev_addr(dev_addr, device.dev_addr.as_deref())?;
            let cf_list = match cf_list {
                Some(list) => {
                    let bytes = hex::decode(list.trim())
                        .map_err(|e| anyhow::anyhow!("Invalid CFList hex: {}", e))?;
                    let list: [u8; 16] = bytes.as_slice().try_into().map_err(|_| {
                        anyhow::anyhow!("CFList must be 16 bytes, got {}", bytes.len())
                    })?;
                    Some(list)
                }
                None => None,
            };

            let accept = JoinAccept {
                app_nonce,
                net_id,
                dev_addr,
                dl_settings,
                rx_delay,
                cf_list,
            };
            let frame = accept
                .encode(&app_key)
                .context("Failed to build join-accept")?;
            info!("JoinAccept for DevAddr={:08X}: {} bytes", dev_addr, frame.len());
            let encoded = enc.encode(&frame);
            emit(cli.json, encoded.clone(), json!({ "frame": encoded }))?;
        }
        Command::OpenJoinAccept {
            app_key,
            dev_nonce,
            frame,
        } => {
            let app_key = require_key(app_key, device.app_key, "AppKey")?;
            let bytes = enc.decode(&frame)?;
            let accept =
                JoinAccept::decode(&bytes, &app_key).context("Failed to open join-accept")?;

            let session = match dev_nonce {
                Some(dev_nonce) => Some(
                    SessionKeys::derive(&app_key, &accept.join_params(dev_nonce), accept.dev_addr)
                        .context("Session key derivation failed")?,
                ),
                None => None,
            };

            let mut text = format!(
                "AppNonce={:06X} NetID={:06X} DevAddr={:08X} DLSettings={:02X} RxDelay={}",
                accept.app_nonce, accept.net_id, accept.dev_addr, accept.dl_settings, accept.rx_delay
            );
            if let Some(list) = &accept.cf_list {
                text.push_str(&format!(" CFList={}", hex::encode(list)));
            }
            if let Some(keys) = &session {
                text.push_str(&format!(
                    "\nNwkSKey={}\nAppSKey={}",
                    keys.nwk_s_key, keys.app_s_key
                ));
            }

            emit(
                cli.json,
                text,
                json!({
                    "app-nonce": format!("{:06X}", accept.app_nonce),
                    "net-id": format!("{:06X}", accept.net_id),
                    "dev-addr": format!("{:08X}", accept.dev_addr),
                    "dl-settings": accept.dl_settings,
                    "rx-delay": accept.rx_delay,
                    "cf-list": accept.cf_list.map(hex::encode),
                    "nwk-s-key": session.as_ref().map(|k| k.nwk_s_key.to_string()),
                    "app-s-key": session.as_ref().map(|k| k.app_s_key.to_string()),
                }),
            )?;
        }
    }

    Ok(())
}
