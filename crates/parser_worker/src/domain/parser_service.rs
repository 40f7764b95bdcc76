use crate::domain::EventDispatcher;
use common::domain::{
    Caller, CreateParserRepoInput, DeleteParserRepoInput, DomainError, DomainEvent, DomainResult,
    EventAction, ListParsersRepoInput, ParserDefinition, ParserFilter, ParserRepository,
    UpdateParserRepoInput,
};
use common::garde::{non_blank, validate_struct};
use garde::Validate;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Validate)]
pub struct CreateParserRequest {
    #[garde(length(min = 1, max = 255), custom(non_blank))]
    pub name: String,
    #[garde(skip)]
    pub description: String,
    #[garde(length(min = 1), custom(non_blank))]
    pub function: String,
    #[garde(skip)]
    pub hidden: bool,
}

/// Partial update; `None` leaves the field unchanged
#[derive(Debug, Clone, Validate)]
pub struct UpdateParserRequest {
    #[garde(length(min = 1))]
    pub id: String,
    #[garde(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[garde(skip)]
    pub description: Option<String>,
    #[garde(length(min = 1))]
    pub function: Option<String>,
    #[garde(skip)]
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, Default, Validate)]
pub struct ListParsersRequest {
    #[garde(skip)]
    pub name_contains: Option<String>,
    #[garde(range(min = 1, max = 1000))]
    pub limit: Option<usize>,
    #[garde(skip)]
    pub offset: usize,
}

/// Parser definition CRUD.
///
/// Reads are scoped by [`ParserFilter::scoped_for`]; writes require the owner
/// or an admin. Every write dispatches a domain event without waiting on the bus.
pub struct ParserService {
    repository: Arc<dyn ParserRepository>,
    events: EventDispatcher,
}

impl ParserService {
    pub fn new(repository: Arc<dyn ParserRepository>, events: EventDispatcher) -> Self {
        Self { repository, events }
    }

    #[instrument(skip(self, request, caller), fields(user_id = %caller.user_id, name = %request.name))]
    pub async fn create_parser(
        &self,
        request: CreateParserRequest,
        caller: &Caller,
    ) -> DomainResult<ParserDefinition> {
        let user_id = caller.require_authenticated()?;
        validate_struct(&request)?;

        let parser = self
            .repository
            .create_parser(CreateParserRepoInput {
                id: xid::new().to_string(),
                user_id: user_id.to_string(),
                name: request.name,
                description: request.description,
                function: request.function,
                hidden: request.hidden,
            })
            .await?;

        info!(parser_id = %parser.id, "Created parser");
        self.events
            .dispatch(DomainEvent::parser(EventAction::Create, &parser));

        Ok(parser)
    }

    /// Parsers hidden from the caller are reported as not found
    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn get_parser(&self, parser_id: &str, caller: &Caller) -> DomainResult<ParserDefinition> {
        self.repository
            .list_parsers(ListParsersRepoInput {
                filter: ParserFilter::scoped_for(
                    caller,
                    Some(ParserFilter::IdEquals(parser_id.to_string())),
                ),
                limit: Some(1),
                offset: 0,
            })
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::ParserNotFound(parser_id.to_string()))
    }

    #[instrument(skip(self, request, caller), fields(user_id = %caller.user_id))]
    pub async fn list_parsers(
        &self,
        request: ListParsersRequest,
        caller: &Caller,
    ) -> DomainResult<Vec<ParserDefinition>> {
        validate_struct(&request)?;

        let base = request.name_contains.map(ParserFilter::NameContains);
        let parsers = self
            .repository
            .list_parsers(ListParsersRepoInput {
                filter: ParserFilter::scoped_for(caller, base),
                limit: request.limit,
                offset: request.offset,
            })
            .await?;

        debug!(count = parsers.len(), "Listed parsers");
        Ok(parsers)
    }

    #[instrument(skip(self, request, caller), fields(user_id = %caller.user_id, parser_id = %request.id))]
    pub async fn update_parser(
        &self,
        request: UpdateParserRequest,
        caller: &Caller,
    ) -> DomainResult<ParserDefinition> {
        caller.require_authenticated()?;
        validate_struct(&request)?;

        let existing = self.get_parser(&request.id, caller).await?;
        self.ensure_can_modify(&existing, caller)?;

        let parser = self
            .repository
            .update_parser(UpdateParserRepoInput {
                id: request.id,
                name: request.name,
                description: request.description,
                function: request.function,
                hidden: request.hidden,
            })
            .await?;

        info!(updated_at = %parser.updated_at, "Updated parser");
        self.events
            .dispatch(DomainEvent::parser(EventAction::Update, &parser));

        Ok(parser)
    }

    /// The DELETE event carries the definition as it was before removal
    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn delete_parser(&self, parser_id: &str, caller: &Caller) -> DomainResult<()> {
        caller.require_authenticated()?;

        let existing = self.get_parser(parser_id, caller).await?;
        self.ensure_can_modify(&existing, caller)?;

        self.repository
            .delete_parser(DeleteParserRepoInput {
                id: parser_id.to_string(),
            })
            .await?;

        info!(parser_id, "Deleted parser");
        self.events
            .dispatch(DomainEvent::parser(EventAction::Delete, &existing));

        Ok(())
    }

    fn ensure_can_modify(&self, parser: &ParserDefinition, caller: &Caller) -> DomainResult<()> {
        if caller.can_modify(&parser.user_id) {
            return Ok(());
        }
        warn!(parser_id = %parser.id, owner_id = %parser.user_id, "Caller may not modify parser");
        Err(DomainError::Forbidden(format!(
            "parser {} belongs to another user",
            parser.id
        )))
    }
}
