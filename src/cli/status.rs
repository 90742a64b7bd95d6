use eyre::{Context, Result};

use crate::{
    config::Config,
    hardware::{GATE_COUNT, Hardware, HardwareError},
};

pub async fn run(config: &Config) -> Result<()> {
    let hardware = super::connect_hardware(config).await?;

    let result = report(hardware.as_ref()).await;
    hardware.disconnect().await?;

    result
}

async fn report(hardware: &dyn Hardware) -> Result<()> {
    println!("Vent gates");

    for index in 0..GATE_COUNT {
        match hardware.gate_state(index).await {
            Ok(state) => println!("  {index}: {state}"),
            Err(HardwareError::GateNotConfigured(_)) => println!("  {index}: not configured"),
            Err(e) => return Err(e).wrap_err_with(|| format!("Failed to read vent {index}")),
        }
    }

    let drive_state = hardware.drive_state().await?;
    let manual = hardware.get_manual_control().await?;
    let frequency = hardware.get_fan_frequency().await?;
    let voltage = hardware.bus_voltage().await?;

    println!("Fan drive");
    println!("  State:     {drive_state}");
    println!("  Control:   {}", if manual { "manual" } else { "automatic" });
    println!("  Frequency: {frequency:.1} / {:.1} Hz", hardware.max_frequency());
    println!("  Bus:       {voltage:.1} V");

    println!("Last faults");

    for (i, fault) in hardware.last_8_faults().await?.iter().enumerate() {
        println!("  {i}: [{:>3}] {}", fault.code, fault.description);
    }

    Ok(())
}
