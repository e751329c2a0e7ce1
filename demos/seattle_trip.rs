//! Example: packing a long travel-planning conversation
//!
//! Builds a conversation about a Chicago trip that switches to Seattle,
//! then packs it for the final question at a few budgets and prints how
//! each message was represented.
//!
//! Runs fully offline with the default heuristic compressor and hashing
//! embedder. Set `FOCUS__COMPRESSOR__BACKEND=llm` and
//! `FOCUS__COMPRESSOR__API_KEY` to compress with a remote model instead.

use focus_context::{logging::init_logging, Config, ContextPacker, Conversation, Role};
use std::sync::Arc;

const TURNS: &[(Role, &str)] = &[
    (Role::User, "I want to plan a 4-day weekend trip to Chicago in October. I love architecture, deep-dish pizza and jazz bars."),
    (Role::Assistant, "Great choice. Day 1: Chicago Architecture Center river cruise, then Lou Malnati's for deep-dish. Day 2: Art Institute and Millennium Park, evening at the Green Mill jazz club. Day 3: Wrigleyville and a Cubs tour if the season allows. Day 4: Lincoln Park Zoo and the conservatory before your flight."),
    (Role::User, "How should I get around? I don't want to rent a car."),
    (Role::Assistant, "Use the CTA. A 3-day Ventra pass covers the L trains and buses. The Blue Line runs directly from O'Hare to downtown, and most sights on the plan are within a short walk of an L stop."),
    (Role::User, "Actually, change of plans. My partner wants Seattle instead. Same dates, same vibe, but we need gluten-free food."),
    (Role::Assistant, "Seattle works well. Day 1: Pike Place Market and the waterfront; Capitol Cider has a fully gluten-free kitchen. Day 2: Seattle Center, Chihuly Garden and Glass, and the Space Needle. Day 3: coffee crawl through Capitol Hill with Victrola, Vita and Milstead, plus Elliott Bay Book Company. Day 4: ferry to Bainbridge Island."),
    (Role::User, "Any jazz in Seattle? And what about paying for the hotel, should I use Klarna?"),
    (Role::Assistant, "Dimitriou's Jazz Alley downtown is the classic choice, book dinner seats early. Klarna splits a purchase into four interest-free payments, but many hotels charge at check-in, so check whether the booking site supports it and whether the rate is refundable."),
];

const PREAMBLE: &str = "You are a helpful travel assistant. Keep answers practical.";

const QUERY: &str = "Remind me which Seattle spots are gluten-free and where to get coffee.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_logging(&config.logging)?;

    let packer = Arc::new(ContextPacker::from_config(&config)?);
    let mut conversation = Conversation::new(packer);
    for (role, content) in TURNS {
        conversation.add_message(*role, *content);
    }

    println!("Query: {}\n", QUERY);

    for budget in [600, 250, 120] {
        let result = conversation
            .build_context_with_preamble(QUERY, budget, PREAMBLE)
            .await?;
        let stats = &result.stats;

        println!("=== Budget {} ===", budget);
        if let Some(preamble) = &result.preamble {
            println!("[   PREAMBLE]    system    {}", preview(preamble));
        }
        for item in &result.items {
            println!("[{:>11}] #{} {:<9} {}", item.tier, item.position, item.role, preview(&item.text));
        }
        println!(
            "used {}/{} tokens: {} full, {} compressed, {} stubbed, {} dropped\n",
            stats.used,
            stats.budget,
            stats.items_full,
            stats.items_compressed,
            stats.items_stubbed,
            stats.items_dropped()
        );
    }

    println!("{}", serde_json::to_string_pretty(&conversation.build_context(QUERY, 250).await?.stats)?);
    Ok(())
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(72).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
