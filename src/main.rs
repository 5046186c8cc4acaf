mod allocatable;
mod bandit;
mod bid;
mod budgets;
mod charts;
mod comments;
mod config;
mod errors;
mod goals;
mod logger;
mod orchestrator;
mod prefetch;
mod scenarios;
mod thresholds;
mod utils;

use logger::{sanitize_filename, ConsoleReceiver, FileReceiver, LogEvent, Logger};
use scenarios::get_scenario_catalog;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use utils::{RAND_SEED, TOTAL_ENTITY_RUNS};

fn main() {
    let raw_args: Vec<String> = std::env::args().collect();

    // Parse and filter out --verbose and --fastbreak arguments
    let mut args = Vec::new();
    let mut skip_next = false;
    let mut fastbreak = false;
    for (i, arg) in raw_args.iter().enumerate() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--verbose" {
            if i + 1 < raw_args.len() && raw_args[i + 1] == "bandit" {
                utils::VERBOSE_BANDIT.store(true, Ordering::Relaxed);
                skip_next = true;
            }
            continue;
        }
        if arg == "--fastbreak" {
            fastbreak = true;
            continue;
        }
        args.push(arg.clone());
    }

    // Check if "charts" argument is provided
    if args.len() > 1 && args[1] == "charts" {
        match charts::generate_all_charts() {
            Ok(()) => {
                println!("All chart generation completed successfully.");
            }
            Err(e) => {
                eprintln!("Error generating charts: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if args.len() > 1 {
        let scenario_arg = &args[1];

        // Parse iterations parameter if present
        let iterations = if args.len() > 2 {
            match args[2].parse::<u64>() {
                Ok(n) => n,
                Err(_) => {
                    eprintln!(
                        "Error: Invalid iterations parameter '{}'. Expected a number.",
                        args[2]
                    );
                    std::process::exit(1);
                }
            }
        } else {
            1
        };

        // Parse optional starting iteration index if present
        let start_iteration = if args.len() > 3 {
            match args[3].parse::<u64>() {
                Ok(n) => n,
                Err(_) => {
                    eprintln!(
                        "Error: Invalid start iteration parameter '{}'. Expected a number.",
                        args[3]
                    );
                    std::process::exit(1);
                }
            }
        } else {
            0
        };

        // Get all scenarios from the catalog
        let all_scenarios = get_scenario_catalog();

        // Filter scenarios: if "all", use all scenarios; otherwise filter to the named scenario
        let scenarios: Vec<_> = if scenario_arg == "all" {
            all_scenarios.clone()
        } else {
            let found = all_scenarios.iter().find(|s| s.short_name == scenario_arg);
            match found {
                Some(scenario) => vec![scenario.clone()],
                None => {
                    eprintln!("Error: Scenario '{}' not found.", scenario_arg);
                    eprintln!("Available scenarios:");
                    for s in &all_scenarios {
                        eprintln!("  - {}", s.short_name);
                    }
                    std::process::exit(1);
                }
            }
        };

        // Set up logger with console and validation file receivers
        // Single named scenario with a single iteration also shows Scenario
        // events on console; multiple iterations suppress them to keep the
        // output readable
        let mut logger = Logger::new();
        if scenario_arg == "all" || iterations > 1 {
            logger.add_receiver(ConsoleReceiver::new(vec![LogEvent::Validation]));
        } else {
            logger.add_receiver(ConsoleReceiver::new(vec![
                LogEvent::Validation,
                LogEvent::Scenario,
            ]));
        }

        // Add validation receiver (for validation events)
        let summary_receiver_id = logger.add_receiver(FileReceiver::new(
            &PathBuf::from("log/summary.log"),
            vec![LogEvent::Validation],
        ));

        // Reset and log initial entity run count
        TOTAL_ENTITY_RUNS.store(0, Ordering::Relaxed);
        let initial_count = TOTAL_ENTITY_RUNS.load(Ordering::Relaxed);

        if scenario_arg == "all" {
            if iterations > 1 {
                logln!(&mut logger, LogEvent::Validation, "Running all scenarios {} times... (Total entity runs: {})\n", iterations, initial_count);
            } else {
                logln!(&mut logger, LogEvent::Validation, "Running all scenarios... (Total entity runs: {})\n", initial_count);
            }
        } else if iterations > 1 {
            logln!(&mut logger, LogEvent::Validation, "Running scenario '{}' {} times... (Total entity runs: {})\n", scenario_arg, iterations, initial_count);
        } else {
            logln!(&mut logger, LogEvent::Validation, "Running scenario '{}'... (Total entity runs: {})\n", scenario_arg, initial_count);
        }

        // Outer loop for scenarios
        'scenarios: for scenario in &scenarios {
            log!(&mut logger, LogEvent::Validation, "{}: ", scenario.short_name);

            // Add scenario-level receiver
            let scenario_receiver_id = logger.add_receiver(FileReceiver::new(
                &PathBuf::from(format!(
                    "log/{}/scenario.log",
                    sanitize_filename(scenario.short_name)
                )),
                vec![LogEvent::Scenario],
            ));

            // Verbose bandit output goes to its own per-scenario file
            let bandit_receiver_id = if utils::VERBOSE_BANDIT.load(Ordering::Relaxed) {
                Some(logger.add_receiver(FileReceiver::new(
                    &PathBuf::from(format!(
                        "log/{}/bandit.log",
                        sanitize_filename(scenario.short_name)
                    )),
                    vec![LogEvent::Bandit],
                )))
            } else {
                None
            };

            // Inner loop for iterations
            for i in start_iteration..(start_iteration + iterations) {
                if iterations > 1 {
                    let iteration_num = i - start_iteration + 1;
                    log!(&mut logger, LogEvent::Validation, "[{}/{}] ", iteration_num, iterations);
                }

                // Set RAND_SEED to iteration number
                RAND_SEED.store(i, Ordering::Relaxed);

                match (scenario.run)(scenario.short_name, &mut logger) {
                    Ok(()) => {
                        if iterations > 1 {
                            logln!(&mut logger, LogEvent::Validation, "✓");
                        } else {
                            logln!(&mut logger, LogEvent::Validation, "✓ PASSED");
                        }
                    }
                    Err(e) => {
                        if iterations > 1 {
                            logln!(&mut logger, LogEvent::Validation, "✗");
                        } else {
                            logln!(&mut logger, LogEvent::Validation, "✗ FAILED: {}", e);
                        }

                        // If fastbreak is enabled, stop immediately on first failure
                        if fastbreak {
                            logger.remove_receiver(scenario_receiver_id);
                            if let Some(id) = bandit_receiver_id {
                                logger.remove_receiver(id);
                            }
                            logln!(&mut logger, LogEvent::Validation, "\nStopping scenario execution due to failure (--fastbreak enabled)");
                            if iterations > 1 {
                                let iteration_num = i - start_iteration + 1;
                                logln!(&mut logger, LogEvent::Validation, "Error at iteration {}/{} (seed {}): {}", iteration_num, iterations, i, e);
                            } else {
                                logln!(&mut logger, LogEvent::Validation, "Error: {}", e);
                            }
                            break 'scenarios;
                        }
                    }
                }

                // Flush to ensure validation is written to summary.log
                let _ = logger.flush();
            }

            // Remove scenario-level receivers
            logger.remove_receiver(scenario_receiver_id);
            if let Some(id) = bandit_receiver_id {
                logger.remove_receiver(id);
            }
        }

        // Log final entity run count
        let final_count = TOTAL_ENTITY_RUNS.load(Ordering::Relaxed);
        logln!(&mut logger, LogEvent::Validation, "\nTotal entity runs completed: {}", final_count);

        // Remove validation receiver
        logger.remove_receiver(summary_receiver_id);
    } else {
        // Default behavior: run every scenario once with validation output
        let mut logger = Logger::new();
        logger.add_receiver(ConsoleReceiver::new(vec![
            LogEvent::Validation,
            LogEvent::Scenario,
        ]));
        let mut failed = false;
        for scenario in get_scenario_catalog() {
            if let Err(e) = (scenario.run)(scenario.short_name, &mut logger) {
                eprintln!("Error running scenario '{}': {}", scenario.short_name, e);
                failed = true;
            }
        }
        if failed {
            std::process::exit(1);
        }
    }
}
