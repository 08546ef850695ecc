use taskward_application::{CreateTodoItemInput, TodoService};
use taskward_core::AppResult;
use taskward_domain::{PriorityLevel, TodoItem};
use taskward_infrastructure::ItemCountListener;
use tracing::info;

/// Outcome of the scripted session.
#[derive(Debug)]
pub struct SessionSummary {
    pub lists: usize,
    pub remaining_items: usize,
    pub completed_items: usize,
}

/// Creates a list, adds items, completes one, and deletes another.
pub async fn run_scripted_session(
    service: &TodoService,
    item_counts: &ItemCountListener,
) -> AppResult<SessionSummary> {
    let list = service.create_list("Weekend errands", "#FFC300").await?;
    info!(
        list_id = %list.id(),
        title = %list.title().as_str(),
        colour = list.colour().name(),
        created_by = ?list.audit().created_by().map(|actor| actor.as_str()),
        created_at = ?list.audit().created_at(),
        "list created"
    );

    let mut items = Vec::new();
    for (title, priority) in [
        ("Buy groceries", PriorityLevel::High),
        ("Return library books", PriorityLevel::Medium),
        ("Wash the car", PriorityLevel::Low),
    ] {
        let item = service
            .create_item(CreateTodoItemInput {
                list_id: list.id(),
                title: title.to_owned(),
                note: None,
                priority,
                reminder: None,
            })
            .await?;
        log_item("item created", &item);
        items.push(item);
    }

    if let Some(first) = items.first() {
        let completed = service.complete_item(first.id()).await?;
        log_item("item completed", &completed);
    }
    if let Some(last) = items.last() {
        service.delete_item(last.id()).await?;
        info!(item_id = %last.id(), "item deleted");
    }

    let remaining = service.list_items(list.id()).await?;
    for item in &remaining {
        log_item("stored item", item);
    }
    let projected_items = item_counts.count_for(list.id()).await?;
    info!(
        list_id = %list.id(),
        projected_items,
        "item count projection"
    );

    Ok(SessionSummary {
        lists: service.list_lists().await?.len(),
        remaining_items: remaining.len(),
        completed_items: remaining.iter().filter(|item| item.is_done()).count(),
    })
}

fn log_item(message: &str, item: &TodoItem) {
    info!(
        item_id = %item.id(),
        list_id = %item.list_id(),
        title = %item.title().as_str(),
        priority = ?item.priority(),
        done = item.is_done(),
        created_by = ?item.audit().created_by().map(|actor| actor.as_str()),
        last_modified_by = ?item.audit().last_modified_by().map(|actor| actor.as_str()),
        last_modified_at = ?item.audit().last_modified_at(),
        "{message}"
    );
}
