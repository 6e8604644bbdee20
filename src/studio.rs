//! Per-session studio state: chosen photos, whether a card is being drawn, and the latest
//! card or error.

use tracing::{debug, info};

use crate::constants::MAX_SOURCE_IMAGES;
use crate::encoding::SourceImage;
use crate::error::SnowcardError;
use crate::pipeline::FinalCard;

/// The latest result shown to the user. A card and an error are never shown together.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Outcome {
    /// Nothing generated yet
    #[default]
    Empty,
    /// The latest card
    Card(FinalCard),
    /// The latest attempt failed; the card before it is kept for download, not display.
    Failed {
        /// Human readable reason
        message: String,
        /// Card from an earlier successful run
        previous: Option<FinalCard>,
    },
}

/// Proof that a run was started, handed back on completion.
#[derive(Clone, Debug)]
pub struct Ticket {
    generation: u64,
    sources: Vec<SourceImage>,
}

impl Ticket {
    /// Photos to run the pipeline on, as they were when the run started.
    pub fn sources(&self) -> &[SourceImage] {
        &self.sources
    }

    /// Request generation this ticket belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// One person's studio.
#[derive(Clone, Debug, Default)]
pub struct Studio {
    sources: Vec<SourceImage>,
    outcome: Outcome,
    generation: u64,
    in_flight: Option<u64>,
}

impl Studio {
    /// Empty studio.
    pub fn new() -> Self {
        Self::default()
    }

    /// Photos in upload order.
    pub fn sources(&self) -> &[SourceImage] {
        &self.sources
    }

    /// True while a run is in flight.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Latest outcome.
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// The card on display, if any.
    pub fn card(&self) -> Option<&FinalCard> {
        match &self.outcome {
            Outcome::Card(card) => Some(card),
            _ => None,
        }
    }

    /// The error on display, if any.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Most recent successful card, shown or not.
    pub fn last_card(&self) -> Option<&FinalCard> {
        match &self.outcome {
            Outcome::Card(card) => Some(card),
            Outcome::Failed { previous, .. } => previous.as_ref(),
            Outcome::Empty => None,
        }
    }

    /// Current request generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Adds a photo; clears the previous result.
    pub fn add_source(&mut self, source: SourceImage) -> Result<(), SnowcardError> {
        if self.is_busy() {
            return Err(SnowcardError::Busy);
        }
        if self.sources.len() >= MAX_SOURCE_IMAGES {
            return Err(SnowcardError::InvalidRequest(format!(
                "at most {MAX_SOURCE_IMAGES} photos can be used"
            )));
        }
        self.sources.push(source);
        self.outcome = Outcome::Empty;
        Ok(())
    }

    /// Removes the photo at `index`; clears the previous result.
    pub fn remove_source(&mut self, index: usize) -> Result<SourceImage, SnowcardError> {
        if self.is_busy() {
            return Err(SnowcardError::Busy);
        }
        if index >= self.sources.len() {
            return Err(SnowcardError::NotFound(format!("photo {index}")));
        }
        self.outcome = Outcome::Empty;
        Ok(self.sources.remove(index))
    }

    /// Starts a run. Refused while another is in flight or when there are no photos.
    pub fn begin(&mut self) -> Result<Ticket, SnowcardError> {
        if self.is_busy() {
            return Err(SnowcardError::Busy);
        }
        if self.sources.is_empty() {
            return Err(SnowcardError::InvalidRequest(
                "upload at least one photo first".to_string(),
            ));
        }
        self.generation += 1;
        self.in_flight = Some(self.generation);
        // a retry clears the error but brings back the last good card
        if matches!(self.outcome, Outcome::Failed { .. }) {
            self.outcome = self
                .last_card_owned()
                .map(Outcome::Card)
                .unwrap_or_default();
        }
        info!("Starting generation {}", self.generation);
        Ok(Ticket {
            generation: self.generation,
            sources: self.sources.clone(),
        })
    }

    fn last_card_owned(&self) -> Option<FinalCard> {
        self.last_card().cloned()
    }

    /// Applies the result of a run. Returns false if the result was stale and dropped.
    pub fn complete(&mut self, ticket: &Ticket, result: Result<FinalCard, SnowcardError>) -> bool {
        if self.in_flight == Some(ticket.generation) {
            self.in_flight = None;
        }
        if ticket.generation != self.generation {
            debug!(
                "Discarding result of generation {} (now at {})",
                ticket.generation, self.generation
            );
            return false;
        }
        self.outcome = match result {
            Ok(card) => Outcome::Card(card),
            Err(err) => Outcome::Failed {
                message: err.user_message(),
                previous: self.last_card_owned(),
            },
        };
        true
    }

    /// Forgets photos and results. The studio is free again at once; a run still in flight
    /// is left to finish and its result is thrown away.
    pub fn reset(&mut self) {
        if let Some(abandoned) = self.in_flight.take() {
            debug!("Abandoning generation {abandoned}");
        }
        self.sources.clear();
        self.outcome = Outcome::Empty;
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::EncodedImage;

    fn photo(tag: u8) -> SourceImage {
        SourceImage::new(vec![tag], "image/jpeg").expect("photo")
    }

    fn card(tag: &str) -> FinalCard {
        FinalCard::new(EncodedImage::from_base64("image/png", tag), false)
    }

    #[test]
    fn fourth_photo_is_refused() {
        let mut studio = Studio::new();
        for tag in 0..3 {
            studio.add_source(photo(tag)).expect("add");
        }
        assert!(matches!(
            studio.add_source(photo(9)),
            Err(SnowcardError::InvalidRequest(_))
        ));
        assert_eq!(studio.sources().len(), 3);
    }

    #[test]
    fn begin_requires_photos() {
        let mut studio = Studio::new();
        assert!(matches!(
            studio.begin(),
            Err(SnowcardError::InvalidRequest(_))
        ));
        assert!(!studio.is_busy());
    }

    #[test]
    fn only_one_run_at_a_time() {
        let mut studio = Studio::new();
        studio.add_source(photo(1)).expect("add");
        let ticket = studio.begin().expect("begin");
        assert!(studio.is_busy());
        assert!(matches!(studio.begin(), Err(SnowcardError::Busy)));
        assert!(matches!(studio.add_source(photo(2)), Err(SnowcardError::Busy)));
        assert!(studio.complete(&ticket, Ok(card("AA=="))));
        assert!(!studio.is_busy());
        assert!(studio.card().is_some());
        assert!(studio.error().is_none());
    }

    #[test]
    fn failure_keeps_the_earlier_card_but_shows_the_error() {
        let mut studio = Studio::new();
        studio.add_source(photo(1)).expect("add");
        let first = studio.begin().expect("begin");
        studio.complete(&first, Ok(card("Zmlyc3Q=")));

        let second = studio.begin().expect("regenerate");
        studio.complete(&second, Err(SnowcardError::Transport("reset by peer".into())));

        assert!(studio.card().is_none());
        assert!(studio.error().is_some_and(|msg| msg.contains("reset by peer")));
        assert_eq!(
            studio.last_card().map(|c| c.image().as_str().to_string()),
            Some("data:image/png;base64,Zmlyc3Q=".to_string())
        );

        let third = studio.begin().expect("retry");
        assert!(studio.error().is_none());
        assert!(studio.card().is_some());
        studio.complete(&third, Ok(card("dGhpcmQ=")));
        assert_eq!(
            studio.card().map(|c| c.image().as_str().to_string()),
            Some("data:image/png;base64,dGhpcmQ=".to_string())
        );
    }

    #[test]
    fn reset_discards_in_flight_result() {
        let mut studio = Studio::new();
        studio.add_source(photo(1)).expect("add");
        let ticket = studio.begin().expect("begin");
        studio.reset();

        assert!(studio.sources().is_empty());
        assert!(!studio.is_busy());
        assert!(!studio.complete(&ticket, Ok(card("c3RhbGU="))));
        assert!(!studio.is_busy());
        assert_eq!(studio.outcome(), &Outcome::Empty);
    }

    #[test]
    fn late_result_does_not_free_a_newer_run() {
        let mut studio = Studio::new();
        studio.add_source(photo(1)).expect("add");
        let abandoned = studio.begin().expect("begin");
        studio.reset();

        studio.add_source(photo(2)).expect("add after reset");
        let current = studio.begin().expect("begin after reset");
        assert!(!studio.complete(&abandoned, Ok(card("c3RhbGU="))));
        assert!(studio.is_busy());
        assert!(studio.complete(&current, Ok(card("AA=="))));
        assert!(!studio.is_busy());
    }

    #[test]
    fn changing_photos_clears_the_result() {
        let mut studio = Studio::new();
        studio.add_source(photo(1)).expect("add");
        let ticket = studio.begin().expect("begin");
        studio.complete(&ticket, Ok(card("AA==")));

        studio.add_source(photo(2)).expect("add");
        assert_eq!(studio.outcome(), &Outcome::Empty);

        let ticket = studio.begin().expect("begin");
        studio.complete(&ticket, Ok(card("AA==")));
        let removed = studio.remove_source(0).expect("remove");
        assert_eq!(removed, photo(1));
        assert_eq!(studio.outcome(), &Outcome::Empty);
        assert!(matches!(
            studio.remove_source(5),
            Err(SnowcardError::NotFound(_))
        ));
    }

    #[test]
    fn generations_increase_monotonically() {
        let mut studio = Studio::new();
        studio.add_source(photo(1)).expect("add");
        let first = studio.begin().expect("begin");
        studio.complete(&first, Ok(card("AA==")));
        let second = studio.begin().expect("begin");
        assert!(second.generation() > first.generation());
        assert_eq!(second.sources().len(), 1);
    }
}
