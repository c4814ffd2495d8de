//! Command-line surface and report rendering for the meta-norms harness.

use std::fmt::Write as _;

use clap::{Parser, ValueEnum};
use metanorms_core::{
    EvolutionObserver, GameVariant, GenerationRecord, MetaNormsConfig, MutationScheme, Payoffs,
    RunSummary, TraitSummary,
};
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::info;

/// Output encodings for run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VariantArg {
    Norms,
    MetaNorms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MutationArg {
    FixedBit,
    EachBit,
}

#[derive(Parser, Debug)]
#[command(
    name = "metanorms",
    version,
    about = "Evolve strategies in the observable n-person dilemma with meta-punishment",
    allow_negative_numbers = true
)]
pub struct Cli {
    /// Agents in the population.
    #[arg(long, default_value_t = 20)]
    pub agents: usize,
    /// Stages played per generation.
    #[arg(long, default_value_t = 4)]
    pub games_per_generation: u32,
    /// Generations per simulation run.
    #[arg(long, default_value_t = 100)]
    pub generations: u32,
    /// Independent simulation runs.
    #[arg(long, default_value_t = 5)]
    pub simulations: u32,

    /// Gain credited to a defector.
    #[arg(long, default_value_t = 3.0)]
    pub temptation: f64,
    /// Loss suffered by everyone else per defector.
    #[arg(long, default_value_t = -1.0)]
    pub hurt: f64,
    /// Loss suffered by a punished defector.
    #[arg(long, default_value_t = -9.0)]
    pub punishment_cost: f64,
    /// Loss paid by a punisher.
    #[arg(long, default_value_t = -2.0)]
    pub enforcement_cost: f64,
    /// Loss suffered by a meta-punished non-punisher.
    #[arg(long, default_value_t = -9.0)]
    pub meta_punishment_cost: f64,
    /// Loss paid by a meta-punisher.
    #[arg(long, default_value_t = -2.0)]
    pub meta_enforcement_cost: f64,

    /// Mutation probability.
    #[arg(long, default_value_t = 0.01)]
    pub mutation_probability: f64,
    /// Mutation operator.
    #[arg(long, value_enum, default_value_t = MutationArg::FixedBit)]
    pub mutation: MutationArg,
    /// Bit flipped by the fixed-bit operator (0 is least significant).
    #[arg(long, default_value_t = 0)]
    pub mutation_bit: u8,
    /// Game flavour.
    #[arg(long, value_enum, default_value_t = VariantArg::MetaNorms)]
    pub variant: VariantArg,

    /// Seed for reproducible runs.
    #[arg(long, env = "METANORMS_SEED")]
    pub seed: Option<u64>,
    /// Output encoding written to stdout.
    #[arg(long, value_enum, env = "METANORMS_FORMAT", default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
    /// Log every generation's record at info level.
    #[arg(long)]
    pub trace_generations: bool,
    /// Disable ANSI colors in table output.
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    /// Assemble the engine configuration from the parsed flags.
    #[must_use]
    pub fn to_config(&self) -> MetaNormsConfig {
        MetaNormsConfig {
            num_agents: self.agents,
            games_per_generation: self.games_per_generation,
            num_generations: self.generations,
            num_simulations: self.simulations,
            payoffs: Payoffs {
                temptation_to_defect: self.temptation,
                hurt_suffered_by_others: self.hurt,
                cost_of_being_punished: self.punishment_cost,
                enforcement_cost_punishment: self.enforcement_cost,
                cost_of_being_meta_punished: self.meta_punishment_cost,
                enforcement_cost_meta_punishment: self.meta_enforcement_cost,
            },
            mutation_probability: self.mutation_probability,
            mutation: match self.mutation {
                MutationArg::FixedBit => MutationScheme::FixedBit {
                    bit: self.mutation_bit,
                },
                MutationArg::EachBit => MutationScheme::EachBit,
            },
            variant: match self.variant {
                VariantArg::Norms => GameVariant::Norms,
                VariantArg::MetaNorms => GameVariant::MetaNorms,
            },
            rng_seed: self.seed,
        }
    }
}

/// Observer that forwards each generation record to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl EvolutionObserver for TracingObserver {
    fn on_generation(&mut self, record: &GenerationRecord) {
        info!(
            simulation = record.simulation,
            generation = record.generation.0,
            defections = record.tally.defections,
            punishments = record.tally.punishments,
            meta_punishments = record.tally.meta_punishments,
            score_mean = record.score_mean,
            mean_boldness = record.traits.mean_boldness,
            mean_vengefulness = record.traits.mean_vengefulness,
            mean_meta_vengefulness = record.traits.mean_meta_vengefulness,
            "generation"
        );
    }
}

/// Mean of each statistic across runs.
#[must_use]
pub fn aggregate(runs: &[RunSummary]) -> TraitSummary {
    if runs.is_empty() {
        return TraitSummary::default();
    }
    let count = runs.len() as f64;
    let mut total = [0.0_f64; 6];
    for run in runs {
        let (a, b, c, d, e, f) = run.traits.as_tuple();
        for (slot, value) in total.iter_mut().zip([a, b, c, d, e, f]) {
            *slot += value;
        }
    }
    let [a, b, c, d, e, f] = total.map(|sum| sum / count);
    TraitSummary {
        mean_boldness: a,
        mean_vengefulness: b,
        mean_meta_vengefulness: c,
        std_boldness: d,
        std_vengefulness: e,
        std_meta_vengefulness: f,
    }
}

/// Legend naming the punishment parameters, as used on scatter plots.
#[must_use]
pub fn legend(payoffs: &Payoffs) -> String {
    format!(
        "punishment {}/{} meta-punishment {}/{}",
        payoffs.cost_of_being_punished,
        payoffs.enforcement_cost_punishment,
        payoffs.cost_of_being_meta_punished,
        payoffs.enforcement_cost_meta_punishment
    )
}

#[derive(Serialize)]
struct JsonReport<'a> {
    config: &'a MetaNormsConfig,
    legend: String,
    runs: &'a [RunSummary],
    aggregate: TraitSummary,
}

const COLUMNS: [&str; 7] = [
    "run",
    "mean_boldness",
    "mean_vengefulness",
    "mean_meta_vengefulness",
    "std_boldness",
    "std_vengefulness",
    "std_meta_vengefulness",
];

/// Render the summaries in `format`.
pub fn render(
    format: OutputFormat,
    config: &MetaNormsConfig,
    runs: &[RunSummary],
    color: bool,
) -> serde_json::Result<String> {
    match format {
        OutputFormat::Table => Ok(render_table(config, runs, color)),
        OutputFormat::Csv => Ok(render_csv(runs)),
        OutputFormat::Json => serde_json::to_string_pretty(&JsonReport {
            config,
            legend: legend(&config.payoffs),
            runs,
            aggregate: aggregate(runs),
        }),
    }
}

fn stats_cells(traits: &TraitSummary) -> [f64; 6] {
    let (a, b, c, d, e, f) = traits.as_tuple();
    [a, b, c, d, e, f]
}

fn render_table(config: &MetaNormsConfig, runs: &[RunSummary], color: bool) -> String {
    let mut out = String::new();
    let title = format!(
        "{:?} game, {} agents x {} generations ({})",
        config.variant,
        config.num_agents,
        config.num_generations,
        legend(&config.payoffs)
    );
    if color {
        let _ = writeln!(out, "{}", title.bold());
    } else {
        let _ = writeln!(out, "{title}");
    }

    let header = format!(
        "{:<6} {:>14} {:>17} {:>22} {:>12} {:>16} {:>21}",
        COLUMNS[0], COLUMNS[1], COLUMNS[2], COLUMNS[3], COLUMNS[4], COLUMNS[5], COLUMNS[6]
    );
    if color {
        let _ = writeln!(out, "{}", header.cyan());
        let _ = writeln!(out, "{}", "-".repeat(header.len()).dimmed());
    } else {
        let _ = writeln!(out, "{header}");
        let _ = writeln!(out, "{}", "-".repeat(header.len()));
    }

    let mut push_row = |label: String, traits: &TraitSummary| {
        let [a, b, c, d, e, f] = stats_cells(traits);
        let _ = writeln!(
            out,
            "{label:<6} {a:>14.4} {b:>17.4} {c:>22.4} {d:>12.4} {e:>16.4} {f:>21.4}"
        );
    };
    for run in runs {
        push_row(run.simulation.to_string(), &run.traits);
    }
    if runs.len() > 1 {
        push_row("mean".to_string(), &aggregate(runs));
    }
    out
}

fn render_csv(runs: &[RunSummary]) -> String {
    let mut out = COLUMNS.join(",");
    out.push('\n');
    for run in runs {
        let cells = stats_cells(&run.traits).map(|value| value.to_string());
        let _ = writeln!(out, "{},{}", run.simulation, cells.join(","));
    }
    out
}
