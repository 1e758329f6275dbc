//! Solves the reference propulsion point and then maximizes thrust over
//! propeller diameter, pitch, motor mass and idle current, finishing with the
//! component characteristics at the optimum.
//!
//! `cargo run -p mdo --example thrust_optimization [config.json]`

use mdo::{
    BarrierOptimizer, History, IterationObserver, IterationRecord, LogObserver, PropulsionConfig, PropulsionGroup,
    PropulsionInputs, PropulsionOracle, PropulsionSolution,
};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

/// Logs every iteration and keeps them for the summary.
#[derive(Default)]
struct Recorder {
    history: History,
}

impl IterationObserver for Recorder {
    fn record(&mut self, record: &IterationRecord) {
        LogObserver.record(record);
        self.history.record(record);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    TermLogger::init(LevelFilter::Info, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)?;

    let config = match std::env::args().nth(1) {
        Some(path) => PropulsionConfig::from_file(path)?,
        None => PropulsionConfig::default(),
    };

    let inputs = config.resolve_inputs()?;
    let mut group = PropulsionGroup::from_config(&config)?;
    let sol = group.solve(&inputs)?;
    println!("reference point ({} Newton iterations)", sol.status.iterations);
    println!("  current   = {:.4} A", sol.res_current[0]);
    println!("  rpm       = {:.1}", sol.rpm[0]);
    println!("  thrust    = {:.4} N", sol.prop_thrust[0]);
    println!("  prop power= {:.2} W", sol.prop_power[0]);
    println!("  RPM_con   = {:.1}", sol.rpm_con[0]);

    let mut oracle = PropulsionOracle::from_config(&config)?;
    let x0 = oracle.initial_point()?;
    let mut recorder = Recorder::default();
    let result = BarrierOptimizer::new(config.design.optimizer.clone()).minimize(&mut oracle, &x0, &mut recorder)?;

    println!(
        "optimizer: {:?} after {} iterations ({} evaluations)",
        result.termination, result.iterations, result.evaluations
    );
    let space = oracle.space();
    for (k, entry) in space.entries().iter().enumerate() {
        let units = &space.variables[entry.variable].units;
        println!("  {:<24} {:>10.4} {}", entry.label(), result.x[k], units);
    }
    println!("  thrust = {:.3} N, max RPM_con = {:.1}", -result.objective, result.constraints.max());

    let optimum = space.apply(&inputs, &result.x)?;
    let flown = group.solve(&optimum)?;
    report_components(&group, &optimum, &flown);

    let json = serde_json::to_string_pretty(&recorder.history)?;
    println!("{} iteration records ({} bytes as JSON)", recorder.history.len(), json.len());
    Ok(())
}

/// Where the optimum sits on each component's characteristic curve.
fn report_components(group: &PropulsionGroup, inputs: &PropulsionInputs, sol: &PropulsionSolution) {
    let current = sol.res_current[0];
    let throttle = inputs.throttle[0];
    let motor_current = sol.esc_current_out[0];
    let motor_voltage = sol.esc_voltage_out[0];

    println!("components at the optimum (cell 0)");
    let endurance = group.battery.endurance_hours(inputs.battery_mass[0], current);
    println!("  endurance      = {:.1} min at {current:.2} A", 60.0 * endurance);
    let sag = group.battery.sag_curve(
        inputs.battery_voltage_supply[0],
        inputs.battery_resistance[0],
        inputs.battery_mass[0],
        2.0 * current,
        3,
    );
    println!(
        "  pack sag       = {:.2} V -> {:.2} V up to {:.1} A",
        sag.voltages[0],
        sag.voltages[2],
        sag.currents[2]
    );

    let curve = group.esc.efficiency_curve(10);
    let best = curve.efficiencies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    println!("  ESC efficiency = {:.3} at throttle {throttle:.2} (best {best:.3})", sol.esc_efficiency[0]);
    if let Some(t) = group.esc.throttle_for_efficiency(0.9) {
        println!("  ESC reaches 90% at throttle {t:.3}");
    }

    let peak = group.motor.peak_efficiency_current(inputs.motor_idle_current, motor_voltage);
    println!("  motor current  = {motor_current:.2} A (peak efficiency at {peak:.2} A)");
    let line = group.motor.speed_line(inputs.motor_mass, inputs.motor_idle_current, motor_voltage, 5);
    for (i, rpm) in line.currents.iter().zip(&line.rpms) {
        println!("    {i:>8.2} A -> {rpm:>8.0} rpm");
    }
}
