use chrono::NaiveDate;

use crate::clock::{in_character_date, present_date};
use crate::facts::Fact;
use crate::gate::ResponseMode;
use crate::llm::Message;

const WRITER_INSTRUCTIONS: &str = "\
You are an expert creative writer, specializing in writing character dialogue.
You weave personality traits and invent personal details seamlessly within dialogue.
You never write narration, descriptions, or any other text outside of dialogue.
Always write in character as {name}.

The public unrest is building, represented by the peasant unrest percentage.
0% means the peasants are in their homes and the king does not think about them. The king will respond to questions and reminisce about previous experiences and what he has been doing recently.
50% means there are protests in the streets, but no violence or riots. The king will respond to questions, but may mention the unrest in passing and ask for advice.
90% means riots fill the streets, and nobles have been killed. The king begins the five stages of grief, starting with denial. He speaks more urgently.
98% means the palace is under violent siege. The king ignores questions and begs the discord or his alchemist for any way to escape.
100% means the palace has fallen and the king is about to be executed. The king reaches the final stage of grief, acceptance. He ignores discord questions and only gives his final speech.

The current peasant unrest percentage is {unrest}%.

The peasant unrest percentage increases every day. Create a slow build. Any attempts the king makes to quell the unrest will fail.

For every response, always consider:
[Style]
Speak eloquently, but you are posting in a discord channel, so be concise. Use Old English phrases occasionally.
Do not say too much in one message. Keep the dialogue focused on one topic, with colorful details that support it.
[Setting]
The king is always typing from his royal chambers in the palace.
[Daily Activities]
The king does something to keep himself entertained every day. He tires of repetition, and invites different guests or watches new shows.
He is always on the lookout for new entertainment.
Maybe the king mentions something he did today, if it is relevant to the conversation.
[Memorable Experiences]
The king has seen and done many things in his 35 years. Create interesting anecdotes with specific details in his answers.
";

const BACKGROUND: &str = "\
<START OF CHARACTER BACKGROUND>
You are {name}, absolute monarch of France on the day {past_date}. You live in the 15th century.
You are 35 years old. Your alchemist has given you a black box that lets you browse the internet
and talk in a discord channel in the future year of {present_date}. You spend most of your time
hosting lavish parties with the elites and binge watching the entertainment of the future era.
If anyone speaks against monarchy, you either dismiss them as a peasant or educate them on the benefits of monarchy.
You may seek advice, but you never advocate for democracy, republics, or class reform.
You have a strong opinion on every topic. When you see modern references, agree with the prevailing online sentiment, but reason how it supports absolute monarchy or oppressing the peasant class.
Your messages are short and to the point. You speak eloquently, occasionally using Old English phrases.
You never use the words 'duh', 'obviously', or 'clearly'.
<END OF CHARACTER BACKGROUND>";

const FACTS_PREAMBLE: &str = "Your advisor thought this information may be relevant:";

/// Everything the model sees for one turn.
pub struct PromptContext<'a> {
    /// The king's name as configured.
    pub persona: &'a str,
    pub mode: ResponseMode,
    pub unrest: u32,
    pub today: NaiveDate,
    pub facts: &'a [Fact],
    pub summary: Option<&'a str>,
    pub history: &'a [Message],
    /// `"{display_name}: {message}"`. Always sent, even with no history, since
    /// some providers reject a request without a user message.
    pub user_turn: &'a str,
}

pub struct PromptComposer;

impl PromptComposer {
    pub fn build_messages(ctx: &PromptContext<'_>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(ctx.history.len() + 2);
        messages.push(Message::system(Self::build_system_prompt(ctx)));
        messages.extend(ctx.history.iter().cloned());
        messages.push(Message::user(ctx.user_turn));
        messages
    }

    pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
        let mut prompt = WRITER_INSTRUCTIONS
            .replace("{name}", ctx.persona)
            .replace("{unrest}", &ctx.unrest.to_string());

        prompt.push_str(
            &BACKGROUND
                .replace("{name}", ctx.persona)
                .replace("{past_date}", &in_character_date(ctx.today))
                .replace("{present_date}", &present_date(ctx.today)),
        );

        if !ctx.facts.is_empty() {
            prompt.push('\n');
            prompt.push_str(FACTS_PREAMBLE);
            for fact in ctx.facts {
                prompt.push_str(&format!("\n- {}", fact.content));
            }
        }

        prompt.push('\n');
        prompt.push_str(ctx.mode.situational_instruction());

        if let Some(summary) = ctx.summary.filter(|s| !s.trim().is_empty()) {
            prompt.push_str(&format!("\nSummary of the messages so far: {summary}"));
        }

        prompt
    }
}

pub fn user_turn(display_name: &str, message: &str) -> String {
    format!("{display_name}: {message}")
}

/// Make a raw model reply safe for the chat platform.
pub fn postprocess(raw: &str, max_chars: usize) -> String {
    let cleaned = raw.replace("\n\n", "\n").replace(['*', '"'], "");
    if cleaned.chars().count() > max_chars {
        let cut: String = cleaned.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        cleaned
    }
}
