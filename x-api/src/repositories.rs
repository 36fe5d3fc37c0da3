use crate::endpoints::posts::CreatePost;

#[derive(Default)]
pub struct PostRepository;

impl PostRepository {
    pub fn new() -> Self {
        Self
    }

    pub fn create(&self, text: impl Into<String>) -> CreatePost {
        CreatePost::new(text)
    }
}
