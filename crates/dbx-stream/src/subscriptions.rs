//! Channel set derived from the configured universe.

use dbx_core::config::UniverseConfig;
use dbx_core::{Channel, Scope};

const RAW: &str = "raw";

fn any_scope() -> Scope {
    Scope::Kind { kind: None, currency: None }
}

/// Every channel the session subscribes to, in a stable order:
/// account channels, per-currency portfolios, tickers, then charts.
pub fn channels_for(universe: &UniverseConfig) -> Vec<String> {
    let mut channels = vec![
        Channel::Orders { scope: any_scope(), period: RAW.into() },
        Channel::Trades { scope: any_scope(), period: RAW.into() },
        Channel::UserChanges { scope: any_scope(), period: RAW.into() },
    ];
    channels.extend(universe.currencies.iter().map(|c| Channel::Portfolio { currency: c.to_uppercase() }));
    channels.extend(universe.instruments.iter().map(|i| Channel::Ticker { instrument: i.clone() }));
    for instrument in &universe.chart_instruments {
        for resolution in &universe.chart_resolutions {
            channels.push(Channel::Chart { instrument: instrument.clone(), resolution: resolution.clone() });
        }
    }

    let mut names: Vec<String> = Vec::with_capacity(channels.len());
    for name in channels.iter().map(Channel::to_string) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
