use std::error::Error;

use clap::{Parser, ValueEnum};
use fgcore::core::{FactorGraph, FactorGraphBuilder, Observation, VariableId};
use fgcore::inference::{
    BeliefPropagationConfig, GibbsConfig, GibbsSampling, Inferencer, LoopyBeliefPropagation,
};
use fgcore::learning::{EmConfig, ExpectationMaximization};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Engine {
    Lbp,
    Gibbs,
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Inference and learning on a small regulatory chain", long_about = None)]
struct Args {
    /// A YAML file with `lbp`, `gibbs` and `em` sections
    #[clap(short, long, value_parser)]
    config: Option<String>,

    #[clap(short, long, value_enum, default_value = "lbp")]
    engine: Engine,

    /// Observed state of mRNA (0 - low, 1 - normal, 2 - high)
    #[clap(short, long)]
    mrna: Option<usize>,

    /// Relearn the chain's tables from leaf observations by EM
    #[clap(short, long)]
    learn: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Config {
    lbp: BeliefPropagationConfig,
    gibbs: GibbsConfig,
    em: EmConfig,
}

struct Chain {
    fg: FactorGraph,
    mrna: VariableId,
    tab: VariableId,
    protein: VariableId,
}

fn build_chain() -> Result<Chain, Box<dyn Error>> {
    let mut fgb = FactorGraphBuilder::new("mRNA chain");
    let mrna = fgb.add_variable("mRNA", 3);
    let tab = fgb.add_variable("mRNA.tab", 3);
    let protein = fgb.add_variable("protein", 3);
    fgb.add_factor("mRNA prior", &[mrna], vec![0.2, 0.6, 0.2])?;
    fgb.add_factor(
        "mRNA->mRNA.tab",
        &[mrna, tab],
        vec![0.02, 0.01, 0.03, 0.89, 0.92, 0.76, 0.09, 0.07, 0.21],
    )?;
    fgb.add_factor(
        "mRNA->protein",
        &[mrna, protein],
        vec![0.9, 0.05, 0.05, 0.05, 0.9, 0.05, 0.05, 0.05, 0.9],
    )?;
    Ok(Chain {
        fg: fgb.build(),
        mrna,
        tab,
        protein,
    })
}

fn report(engine: &impl Inferencer) -> Result<(), Box<dyn Error>> {
    let fg = engine.factor_graph()?;
    for variable in fg.variables() {
        if let Some(belief) = variable.belief() {
            println!("{:>10}: {}", variable.name(), belief);
        }
    }
    println!("logZ: {}", engine.calculate_log_z()?);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();
    let config: Config = match &args.config {
        Some(path) => serde_yaml::from_str(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };
    let chain = build_chain()?;
    let mut observation = Observation::new();
    if let Some(state) = args.mrna {
        observation.set_state(chain.mrna, state);
    }

    match args.engine {
        Engine::Lbp => {
            let mut lbp = LoopyBeliefPropagation::new(config.lbp.clone())?;
            lbp.set_factor_graph(chain.fg.clone());
            lbp.set_observation(observation);
            println!("{}", lbp.run_message_passing()?);
            report(&lbp)?;
        }
        Engine::Gibbs => {
            let mut gibbs = GibbsSampling::new(config.gibbs)?;
            gibbs.set_factor_graph(chain.fg.clone());
            gibbs.set_observation(observation);
            println!("{}", gibbs.run_sampling()?);
            report(&gibbs)?;
        }
    }

    if args.learn {
        // leaves are observed, mRNA stays hidden
        let corpus: Vec<Observation> = [(0, 0), (1, 1), (1, 1), (2, 2), (1, 0), (2, 2), (1, 1)]
            .iter()
            .map(|(t, p)| [(chain.tab, *t), (chain.protein, *p)].into_iter().collect())
            .collect();
        let mut lbp = LoopyBeliefPropagation::new(config.lbp)?;
        lbp.set_factor_graph(chain.fg);
        let mut em = ExpectationMaximization::new(lbp, config.em)?;
        // the first variable of a conditional table is its parent
        let learnable: Vec<_> = em
            .engine()
            .factor_graph()?
            .discrete_factors()
            .map(|(id, f)| match f.variables() {
                [parent, _, ..] => (id, Some(*parent)),
                _ => (id, None),
            })
            .collect();
        for (id, parent) in learnable {
            em.add_learnable_factor(id, parent)?;
        }
        let info = em.run_with_restarts(&corpus)?;
        println!(
            "EM: {} rounds, restart {}, log-likelihood {}",
            info.iterations_number,
            info.restart,
            info.final_log_likelihood()
        );
        let fg = em.engine().factor_graph()?;
        for (_, factor) in fg.discrete_factors() {
            println!("{:>16}: {}", factor.name(), factor.values());
        }
    }
    Ok(())
}
