use std::{path::PathBuf, time::Instant};

use alloy_primitives::{Address, B256};
use clap::Parser;
use evm_plugin::{
    process_block, AppliedTransaction, CacheDbStore, DispatchStats, PluginController, Scenario,
    ScriptedExecutor,
};
use revm::database::EmptyDB;
use serde::Serialize;
use tracing::{debug, info};

use crate::{args::PluginArgs, logging::LogArgs, HostError};

/// Replay a scripted block through the loaded extensions
#[derive(Parser, Debug)]
pub struct Cmd {
    /// Scenario file: block header, initial balances and scripted transactions
    #[arg(value_name = "SCENARIO")]
    pub scenario: PathBuf,

    /// Write the report to this file instead of stdout
    #[arg(long = "output", short = 'o')]
    pub output: Option<PathBuf>,

    /// Extension loading configuration
    #[command(flatten)]
    pub plugin_args: PluginArgs,

    /// Logging configuration
    #[command(flatten)]
    pub log_args: LogArgs,
}

/// Result of one replayed transaction.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TxReport {
    tx_hash: B256,
    success: bool,
    gas_used: u64,
    rollbacks: usize,
    contracts_touched: Vec<Address>,
}

impl From<&AppliedTransaction> for TxReport {
    fn from(applied: &AppliedTransaction) -> Self {
        Self {
            tx_hash: applied.summary.tx_hash,
            success: applied.outcome.success,
            gas_used: applied.outcome.gas_used,
            rollbacks: applied.summary.rollbacks,
            contracts_touched: applied.summary.contracts_touched.clone(),
        }
    }
}

/// Result of a replayed block.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockReport {
    block_number: u64,
    extensions: Vec<String>,
    transactions: Vec<TxReport>,
    invocations: u64,
    failed_invocations: u64,
}

impl BlockReport {
    fn new(number: u64, controller: &PluginController, applied: &[AppliedTransaction]) -> Self {
        let stats: &DispatchStats = controller.stats();
        Self {
            block_number: number,
            extensions: controller.registry().owners().map(str::to_string).collect(),
            transactions: applied.iter().map(TxReport::from).collect(),
            invocations: stats.invocations(),
            failed_invocations: stats.events.values().map(|event| event.failed).sum(),
        }
    }
}

impl Cmd {
    /// Execute the simulate command
    pub fn run(&self) -> Result<(), HostError> {
        self.log_args.init()?;

        let scenario = self.load_scenario()?;
        let mut controller = self.plugin_args.load()?;

        let mut store = CacheDbStore::<EmptyDB>::default();
        for (address, balance) in &scenario.accounts {
            store.set_balance(*address, *balance)?;
        }
        debug!(accounts = scenario.accounts.len(), "Pre-state seeded");

        info!(number = scenario.block.number, transactions = scenario.transactions.len(), "Replaying block");
        let start = Instant::now();
        let mut executor = ScriptedExecutor::new(scenario.transactions.iter().cloned());
        let applied = process_block(
            &mut controller,
            &scenario.block,
            &scenario.transaction_infos(),
            &mut executor,
            &mut store,
        );
        controller.flush_logs();
        let applied = applied?;
        info!(elapsed = ?start.elapsed(), "Block replayed");

        let report = BlockReport::new(scenario.block.number, &controller, &applied);
        self.write_report(&report)
    }

    fn load_scenario(&self) -> Result<Scenario, HostError> {
        let content = std::fs::read_to_string(&self.scenario)
            .map_err(|source| HostError::FileRead { path: self.scenario.clone(), source })?;
        serde_json::from_str(&content)
            .map_err(|source| HostError::Scenario { path: self.scenario.clone(), source })
    }

    fn write_report(&self, report: &BlockReport) -> Result<(), HostError> {
        let json = serde_json::to_string_pretty(report).map_err(HostError::Encode)?;
        match &self.output {
            Some(path) => std::fs::write(path, json)
                .map_err(|source| HostError::FileWrite { path: path.clone(), source }),
            None => {
                println!("{json}");
                Ok(())
            }
        }
    }
}
