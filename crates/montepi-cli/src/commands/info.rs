//! `montepi info` command - Show the negotiated adapter and its capabilities.

use colored::Colorize;
use montepi_core::reduction::ReductionPreference;
use montepi_wgpu::GpuContext;

use crate::error::CliResult;

/// Execute the `info` command.
pub async fn execute() -> CliResult<()> {
    println!("{} Negotiating WebGPU adapter", "→".bright_cyan());
    let context = GpuContext::new().await?;
    let caps = context.capabilities();

    let yes_no = |supported: bool| {
        if supported {
            "✓".bright_green()
        } else {
            "✗".bright_red()
        }
    };

    println!();
    println!("{}:", "Adapter".bright_white().underline());
    println!("  {} Name: {}", "•".dimmed(), caps.name.bright_white());
    println!("  {} Backend: {:?}", "•".dimmed(), caps.backend);
    println!("  {} Device type: {:?}", "•".dimmed(), caps.device_type);
    if !caps.driver.is_empty() {
        println!("  {} Driver: {}", "•".dimmed(), caps.driver);
    }
    println!();
    println!("{}:", "Features".bright_white().underline());
    println!("  {} SHADER_F16", yes_no(caps.shader_f16));
    println!(
        "  {} SUBGROUP (sizes {}..={})",
        yes_no(caps.subgroups),
        caps.subgroup_min_size,
        caps.subgroup_max_size
    );
    println!();
    println!(
        "  {} Max workgroups per dimension: {}",
        "•".dimmed(),
        caps.max_workgroups_per_dimension
    );
    println!(
        "  {} Max storage binding: {} bytes",
        "•".dimmed(),
        caps.max_storage_binding_size
    );
    println!(
        "  {} Max invocations per workgroup: {}",
        "•".dimmed(),
        context.adapter().limits().max_compute_invocations_per_workgroup
    );

    let strategy = caps.select_strategy(ReductionPreference::Auto)?;
    println!();
    println!(
        "{} Selected reduction: {}",
        "✓".bright_green(),
        strategy.to_string().bright_yellow()
    );
    Ok(())
}
