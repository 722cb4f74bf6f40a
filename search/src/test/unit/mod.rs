mod pipeline;
mod search_loop;
