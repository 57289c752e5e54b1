// Keyboard teleop: W/S drive, A/D turn, R/F speed, Q quit
//
// Sends 6-byte drive packets over UDP at ~50 Hz: SetSpeed whenever the
// commanded pair changes, KeepAlive otherwise so the rover's watchdog stays
// fed without re-issuing speeds.

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::net::UdpSocket;
use std::time::{Duration, Instant};
use tracing::info;

use rover_udp_runtime::protocol::DriveCommand;

const SPEEDS: [i16; 3] = [300, 900, 2000]; // encoder counts/s
const INPUT_TIMEOUT_MS: u64 = 100; // Zero speeds after this much time with no input

#[derive(Parser)]
struct Args {
    /// Rover address, e.g. 192.168.0.125:10000
    target: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(&args.target)?;

    info!("Controls: W/S=drive, A/D=turn, R/F=speed, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&socket);
    disable_raw_mode()?;

    // Leave the rover stopped rather than waiting for its watchdog
    let _ = socket.send(&DriveCommand::SetSpeed { left: 0, right: 0 }.encode());

    result
}

fn run_teleop(socket: &UdpSocket) -> Result<(), Box<dyn std::error::Error>> {
    let mut speed_idx: usize = 0;

    let mut left: i16 = 0;
    let mut right: i16 = 0;
    let mut last_sent: Option<(i16, i16)> = None;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('w') if pressed => {
                        left = SPEEDS[speed_idx];
                        right = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        left = -SPEEDS[speed_idx];
                        right = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        left = -SPEEDS[speed_idx];
                        right = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        left = SPEEDS[speed_idx];
                        right = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Zero speeds if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            left = 0;
            right = 0;
        }

        // Always send at ~50Hz; the rover deduplicates repeated speeds anyway
        let command = if last_sent == Some((left, right)) {
            DriveCommand::KeepAlive
        } else {
            DriveCommand::SetSpeed { left, right }
        };
        socket.send(&command.encode())?;
        last_sent = Some((left, right));
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
